use blt_vm::{LebError, read_sleb128, read_uleb128, write_sleb128, write_uleb128};

fn uleb_roundtrip(value: u32) -> Vec<u8> {
    let mut out = Vec::new();
    write_uleb128(&mut out, value);
    let mut offset = 0;
    let decoded = read_uleb128(&out, &mut offset).expect("decode should succeed");
    assert_eq!(decoded, value);
    assert_eq!(offset, out.len(), "decoder must consume every byte");
    out
}

fn sleb_roundtrip(value: i32) -> Vec<u8> {
    let mut out = Vec::new();
    write_sleb128(&mut out, value);
    let mut offset = 0;
    let decoded = read_sleb128(&out, &mut offset).expect("decode should succeed");
    assert_eq!(decoded, value);
    assert_eq!(offset, out.len(), "decoder must consume every byte");
    out
}

#[test]
fn uleb_roundtrips_across_value_classes() {
    for value in [
        0u32,
        1,
        31,
        32,
        127,
        128,
        255,
        16_383,
        16_384,
        2_097_151,
        2_097_152,
        268_435_455,
        268_435_456,
        u32::MAX,
    ] {
        uleb_roundtrip(value);
    }
}

#[test]
fn uleb_lengths_are_canonical() {
    assert_eq!(uleb_roundtrip(0).len(), 1);
    assert_eq!(uleb_roundtrip(127).len(), 1);
    assert_eq!(uleb_roundtrip(128).len(), 2);
    assert_eq!(uleb_roundtrip(16_383).len(), 2);
    assert_eq!(uleb_roundtrip(16_384).len(), 3);
    assert_eq!(uleb_roundtrip(u32::MAX).len(), 5);
}

#[test]
fn sleb_roundtrips_across_value_classes() {
    for value in [
        0i32,
        1,
        -1,
        63,
        64,
        -64,
        -65,
        127,
        128,
        -128,
        8_191,
        8_192,
        -8_192,
        -8_193,
        i32::MAX,
        i32::MIN,
    ] {
        sleb_roundtrip(value);
    }
}

#[test]
fn sleb_sign_bit_discipline_on_final_byte() {
    // 63 fits one byte; 64 would read back negative without a second byte.
    assert_eq!(sleb_roundtrip(63).len(), 1);
    assert_eq!(sleb_roundtrip(64).len(), 2);
    assert_eq!(sleb_roundtrip(-64).len(), 1);
    assert_eq!(sleb_roundtrip(-65).len(), 2);
    assert_eq!(sleb_roundtrip(-1), vec![0x7F]);
    assert_eq!(sleb_roundtrip(i32::MIN).len(), 5);
}

#[test]
fn dense_range_roundtrips_exactly() {
    for value in -70_000i32..70_000 {
        let mut out = Vec::new();
        write_sleb128(&mut out, value);
        let mut offset = 0;
        assert_eq!(read_sleb128(&out, &mut offset), Ok(value));
    }
    for value in 0u32..140_000 {
        let mut out = Vec::new();
        write_uleb128(&mut out, value);
        let mut offset = 0;
        assert_eq!(read_uleb128(&out, &mut offset), Ok(value));
    }
}

#[test]
fn decoder_rejects_redundant_continuation_bytes() {
    let mut offset = 0;
    assert_eq!(
        read_uleb128(&[0x80, 0x80, 0x00], &mut offset),
        Err(LebError::NonCanonical)
    );
    let mut offset = 0;
    assert_eq!(
        read_sleb128(&[0x81, 0x00], &mut offset),
        Err(LebError::NonCanonical)
    );
    let mut offset = 0;
    assert_eq!(
        read_sleb128(&[0xFF, 0x7F], &mut offset),
        Err(LebError::NonCanonical)
    );
}

#[test]
fn decoder_rejects_truncation_and_overflow() {
    let mut offset = 0;
    assert_eq!(
        read_uleb128(&[0x80], &mut offset),
        Err(LebError::UnexpectedEof)
    );
    let mut offset = 0;
    assert_eq!(
        read_uleb128(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F], &mut offset),
        Err(LebError::Overflow)
    );
}
