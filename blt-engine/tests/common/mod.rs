#![allow(dead_code)]

pub use blt_engine::{
    BackendKind, BitBuffer, BlitOp, CallOptions, Engine, EngineConfig, reference_bitblt,
};

/// Deterministic pattern fill for equivalence sweeps.
pub fn fill_lcg(buffer: &mut BitBuffer, seed: u32) {
    let mut state = seed | 1;
    for word in &mut buffer.words {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *word = state;
    }
}

pub fn verified_engine(backend: BackendKind) -> Engine {
    Engine::new(EngineConfig {
        verify: true,
        backend,
        ..EngineConfig::default()
    })
}

/// Runs `op` through the engine with verification on and asserts the
/// destination equals what the reference produces on a scratch copy.
pub fn assert_matches_reference(
    engine: &mut Engine,
    src: &BitBuffer,
    dst: &mut BitBuffer,
    op: &BlitOp,
) {
    let mut expected = dst.words.clone();
    reference_bitblt(&src.words, &mut expected, op);
    engine
        .bitblt_op(&src.words, &mut dst.words, op, None)
        .expect("specialized call should match the oracle");
    assert_eq!(dst.words, expected);
}
