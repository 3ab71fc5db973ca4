mod common;

use blt_engine::{
    Backend, BackendKind, BinaryBackend, BitBuffer, BlitOp, BlitShape, CompileParams,
    CompilerFlags, EngineError, GeneratedCode, TextualBackend, analyze, create_backend,
    fingerprint,
};
use common::verified_engine;

fn frozen_params(op: BlitOp) -> CompileParams {
    CompileParams {
        shape: BlitShape::frozen(&op),
        flags: CompilerFlags::default(),
    }
}

fn square_op(size: u32) -> BlitOp {
    BlitOp {
        src_w: size,
        src_h: size,
        dst_w: size,
        width: size,
        height: size,
        ..BlitOp::default()
    }
}

#[test]
fn fingerprints_are_deterministic_per_backend() {
    let params = frozen_params(square_op(8));
    assert_eq!(
        fingerprint("textual", &params),
        fingerprint("textual", &params)
    );
    assert_ne!(
        fingerprint("textual", &params),
        fingerprint("binary", &params)
    );
}

#[test]
fn fingerprints_differ_per_frozen_dimension_and_flag() {
    let base = frozen_params(square_op(8));
    let mut wider = base;
    wider.shape.width = Some(16);
    assert_ne!(fingerprint("textual", &base), fingerprint("textual", &wider));

    let mut flagged = base;
    flagged.flags.unroll = true;
    assert_ne!(
        fingerprint("textual", &base),
        fingerprint("textual", &flagged)
    );

    let mut partial = base;
    partial.shape.src_y = None;
    assert_ne!(
        fingerprint("textual", &base),
        fingerprint("textual", &partial)
    );
}

#[test]
fn compile_happens_once_per_fingerprint() {
    let backend = TextualBackend::new();
    let params = frozen_params(square_op(8));

    let first = backend.compile(&params).expect("compile should succeed");
    let second = backend.compile(&params).expect("compile should succeed");
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    let stats = backend.stats();
    assert_eq!(stats.compiles, 1);
    assert_eq!(stats.cache_hits, 1);

    // A different shape compiles separately.
    backend
        .compile(&frozen_params(square_op(16)))
        .expect("compile should succeed");
    assert_eq!(backend.stats().compiles, 2);

    backend.clear_cache();
    backend.compile(&params).expect("compile should succeed");
    assert_eq!(backend.stats().compiles, 3);
}

#[test]
fn engine_reuses_the_cached_artifact_across_calls() {
    let src = BitBuffer::checkerboard(8, 8, 0);
    let mut engine = verified_engine(BackendKind::Binary);
    for _ in 0..5 {
        let mut dst = BitBuffer::new(8, 8);
        engine
            .bitblt_op(&src.words, &mut dst.words, &square_op(8), None)
            .expect("copy should succeed");
    }
    let stats = engine
        .backend_stats(BackendKind::Binary)
        .expect("binary back-end was used");
    assert_eq!(stats.compiles, 1);
    assert_eq!(stats.cache_hits, 4);
}

#[test]
fn factory_accepts_known_names_and_aliases() {
    for (name, expected) in [
        ("textual", "textual"),
        ("text", "textual"),
        ("binary", "binary"),
        ("bytecode", "binary"),
        ("aligned-binary", "aligned-binary"),
        ("aligned", "aligned-binary"),
    ] {
        let backend = create_backend(name).expect("known name should construct");
        assert_eq!(backend.name(), expected);
    }
    assert!(matches!(
        create_backend("native"),
        Err(EngineError::UnknownBackEnd(_))
    ));
}

#[test]
fn textual_generate_emits_a_looped_scan_routine() {
    let backend = TextualBackend::new();
    let GeneratedCode::Text(source) = backend
        .generate(&frozen_params(square_op(8)))
        .expect("generate should succeed")
    else {
        panic!("textual back-end must emit text");
    };
    assert!(source.contains(".arg src_w"));
    assert!(source.contains(".label row_loop"));
    assert!(source.contains("ldw src"));
    assert!(source.contains("stw dst"));
}

#[test]
fn inline_constants_substitute_frozen_dimensions() {
    let mut params = frozen_params(BlitOp {
        src_w: 64,
        src_h: 8,
        dst_w: 64,
        width: 40,
        height: 8,
        ..BlitOp::default()
    });
    params.flags.inline_constants = true;
    let GeneratedCode::Text(source) = TextualBackend::new()
        .generate(&params)
        .expect("generate should succeed")
    else {
        panic!("textual back-end must emit text");
    };
    // Frozen width appears as a literal, strides fold to (64 + 31) >> 5.
    assert!(source.contains("ldc 40"));
    assert!(source.contains("ldc 2"));
    assert!(!source.contains("ldloc width"));
    assert!(!source.contains("stloc src_stride"));
}

#[test]
fn unroll_emits_per_row_and_per_pixel_locals() {
    // Frozen height only: row blocks with per-row y locals.
    let mut params = CompileParams {
        shape: BlitShape {
            height: Some(4),
            ..BlitShape::default()
        },
        flags: CompilerFlags {
            unroll: true,
            ..CompilerFlags::default()
        },
    };
    let GeneratedCode::Text(source) = TextualBackend::new()
        .generate(&params)
        .expect("generate should succeed")
    else {
        panic!("textual back-end must emit text");
    };
    assert!(source.contains(".local src_y_abs_0"));
    assert!(source.contains(".local dst_y_abs_3"));
    assert!(source.contains(".label col_loop_3"));

    // Width frozen too and small enough: fully unrolled pixels.
    params.shape.width = Some(4);
    let GeneratedCode::Text(source) = TextualBackend::new()
        .generate(&params)
        .expect("generate should succeed")
    else {
        panic!("textual back-end must emit text");
    };
    assert!(source.contains(".local src_x_abs_0"));
    assert!(source.contains(".local src_x_abs_15"));
    assert!(source.contains(".local dst_x_abs_15"));
    assert!(!source.contains(".label col_loop"));
}

#[test]
fn unrolled_routines_produce_the_same_output() {
    let src = BitBuffer::checkerboard(8, 8, 0);
    let mut engine = verified_engine(BackendKind::Textual);
    let mut plain = BitBuffer::new(8, 8);
    engine
        .bitblt_op(&src.words, &mut plain.words, &square_op(8), None)
        .expect("plain copy should succeed");

    let mut engine = blt_engine::Engine::new(blt_engine::EngineConfig {
        verify: true,
        compiler: CompilerFlags {
            unroll: true,
            inline_constants: true,
            ..CompilerFlags::default()
        },
        ..blt_engine::EngineConfig::default()
    });
    let mut unrolled = BitBuffer::new(8, 8);
    engine
        .bitblt_op(&src.words, &mut unrolled.words, &square_op(8), None)
        .expect("unrolled copy should succeed");
    assert_eq!(unrolled.words, plain.words);
}

#[test]
fn binary_generate_emits_a_well_formed_module() {
    let backend = BinaryBackend::new();
    let GeneratedCode::Module(bytes) = backend
        .generate(&frozen_params(square_op(8)))
        .expect("generate should succeed")
    else {
        panic!("binary back-end must emit module bytes");
    };
    assert_eq!(&bytes[0..4], &[0x00, 0x61, 0x73, 0x6D]);
    blt_vm::ModuleInstance::instantiate(&bytes).expect("module should instantiate");
}

#[test]
fn aligned_binary_requires_word_alignment() {
    let backend = BinaryBackend::aligned();
    let aligned = frozen_params(BlitOp {
        src_w: 64,
        src_h: 4,
        dst_w: 64,
        width: 32,
        height: 4,
        ..BlitOp::default()
    });
    backend
        .compile(&aligned)
        .expect("aligned shape should compile");

    let unaligned = frozen_params(square_op(8));
    assert!(matches!(
        backend.compile(&unaligned),
        Err(EngineError::Unsupported(_))
    ));
}

#[test]
fn analyzer_flags_match_the_scenarios() {
    // The large aligned copy is flagged word-aligned.
    let aligned = analyze(&frozen_params(square_op(1024)));
    assert!(aligned.word_aligned);
    assert!(!aligned.unroll_small);

    // The shifted copy is not.
    let shifted = analyze(&frozen_params(BlitOp {
        src_w: 32,
        src_h: 32,
        src_x: 3,
        dst_w: 64,
        dst_x: 5,
        width: 27,
        height: 32,
        ..BlitOp::default()
    }));
    assert!(!shifted.word_aligned);
    assert!(!shifted.simd_candidate);
}

#[test]
fn autospecialize_merges_analyzer_flags_into_the_fingerprint() {
    let src = BitBuffer::checkerboard(8, 8, 0);
    let mut engine = blt_engine::Engine::new(blt_engine::EngineConfig {
        autospecialize: true,
        ..blt_engine::EngineConfig::default()
    });
    let mut dst = BitBuffer::new(8, 8);
    engine
        .bitblt_op(&src.words, &mut dst.words, &square_op(8), None)
        .expect("copy should succeed");
    assert_eq!(dst.words, src.words);
}
