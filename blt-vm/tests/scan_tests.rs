use blt_vm::{ScanVmError, assemble_scan, run_scan};

#[test]
fn assembles_and_runs_a_word_copy_loop() {
    let source = r#"
# copy n words from src to dst
.arg n
.local i
ldc 0
stloc i
.label head
ldloc i
ldloc n
cltu
brfalse done
ldloc i        # store index
ldloc i
ldw src
stw dst
ldloc i
ldc 1
add
stloc i
br head
.label done
ret
"#;
    let program = assemble_scan(source).expect("assemble should succeed");
    assert_eq!(program.arg_count, 1);

    let src = vec![0xDEAD_BEEF, 0x0123_4567, 0xAAAA_5555, 7];
    let mut dst = vec![0u32; 4];
    run_scan(&program, &src, &mut dst, &[3]).expect("run should succeed");
    assert_eq!(dst, vec![0xDEAD_BEEF, 0x0123_4567, 0xAAAA_5555, 0]);
}

#[test]
fn bit_operations_work_on_the_word_domain() {
    let source = r#"
.arg bit_pos
ldc 0          # index
ldc 0
ldw src
ldc 1
ldloc bit_pos
shl
or
stw dst
ret
"#;
    let program = assemble_scan(source).expect("assemble should succeed");
    let src = vec![0b1000u32];
    let mut dst = vec![0u32];
    run_scan(&program, &src, &mut dst, &[0]).expect("run should succeed");
    assert_eq!(dst[0], 0b1001);
}

#[test]
fn clear_mask_uses_xor_with_all_ones() {
    let source = r#"
.arg bit_pos
ldc 0
ldc 0
ldw src
ldc 1
ldloc bit_pos
shl
ldc -1
xor
and
stw dst
ret
"#;
    let program = assemble_scan(source).expect("assemble should succeed");
    let src = vec![0xFFFF_FFFFu32];
    let mut dst = vec![0u32];
    run_scan(&program, &src, &mut dst, &[7]).expect("run should succeed");
    assert_eq!(dst[0], 0xFFFF_FF7F);
}

#[test]
fn rejects_unknown_opcodes_labels_and_duplicate_slots() {
    let err = assemble_scan("frobnicate\n").expect_err("unknown opcode should fail");
    assert!(err.message.contains("unknown opcode"));

    let err = assemble_scan("br nowhere\nret\n").expect_err("unknown label should fail");
    assert!(err.message.contains("unknown label"));

    let err =
        assemble_scan(".arg x\n.local x\nret\n").expect_err("duplicate slot should fail");
    assert!(err.message.contains("duplicate slot"));

    let err = assemble_scan("ret\n.arg late\n").expect_err("late arg should fail");
    assert!(err.message.contains("precede code"));
}

#[test]
fn argument_count_is_enforced() {
    let program = assemble_scan(".arg a\n.arg b\nret\n").expect("assemble should succeed");
    let src = vec![0u32];
    let mut dst = vec![0u32];
    assert!(matches!(
        run_scan(&program, &src, &mut dst, &[1]),
        Err(ScanVmError::ArgumentCount { expected: 2, got: 1 })
    ));
}

#[test]
fn source_segment_is_read_only() {
    let program = assemble_scan("ldc 0\nldc 1\nstw src\nret\n").expect("assemble");
    let src = vec![0u32];
    let mut dst = vec![0u32];
    assert!(matches!(
        run_scan(&program, &src, &mut dst, &[]),
        Err(ScanVmError::ReadOnlySegment)
    ));
}

#[test]
fn word_access_is_bounds_checked() {
    let program = assemble_scan("ldc 9\nldw src\nret\n").expect("assemble");
    let src = vec![0u32; 2];
    let mut dst = vec![0u32; 2];
    assert!(matches!(
        run_scan(&program, &src, &mut dst, &[]),
        Err(ScanVmError::WordOutOfBounds { index: 9, .. })
    ));
}
