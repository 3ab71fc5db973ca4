mod common;

use std::sync::Arc;

use blt_engine::{
    Artifact, Backend, BackendKind, BackendStats, BitBuffer, BlitOp, CallOptions, CompileParams,
    Engine, EngineConfig, EngineError, GeneratedCode, TextualBackend, create_backend,
};
use common::{assert_matches_reference, fill_lcg, verified_engine};

const ALL_BACKENDS: [BackendKind; 3] = [
    BackendKind::Textual,
    BackendKind::Binary,
    BackendKind::AlignedBinary,
];

fn full_copy_op(size: u32) -> BlitOp {
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
fn checkerboard_full_copy() {
    for backend in ALL_BACKENDS {
        let src = BitBuffer::checkerboard(8, 8, 0);
        let mut dst = BitBuffer::new(8, 8);
        let mut engine = verified_engine(backend);
        engine
            .bitblt_op(&src.words, &mut dst.words, &full_copy_op(8), None)
            .expect("full copy should succeed");
        assert_eq!(dst.words.len(), 8);
        assert_eq!(dst.words, src.words, "backend {:?}", backend);
    }
}

#[test]
fn partial_copy_from_inner_offset() {
    for backend in ALL_BACKENDS {
        let src = BitBuffer::checkerboard(8, 8, 0);
        let mut dst = BitBuffer::new(8, 8);
        let mut engine = verified_engine(backend);
        let op = BlitOp {
            src_w: 8,
            src_h: 8,
            src_x: 2,
            src_y: 2,
            dst_w: 8,
            width: 4,
            height: 4,
            ..BlitOp::default()
        };
        engine
            .bitblt_op(&src.words, &mut dst.words, &op, None)
            .expect("partial copy should succeed");
        for y in 0..8u32 {
            for x in 0..8u32 {
                let expected = if x < 4 && y < 4 {
                    u32::from(((x + 2) ^ (y + 2)) & 1 == 0)
                } else {
                    0
                };
                assert_eq!(dst.get(x, y), expected, "pixel ({x}, {y}) on {backend:?}");
            }
        }
    }
}

#[test]
fn small_source_into_offset_destination() {
    for backend in ALL_BACKENDS {
        let src = BitBuffer::checkerboard(4, 4, 0);
        let mut dst = BitBuffer::new(8, 8);
        let mut engine = verified_engine(backend);
        let op = BlitOp {
            src_w: 4,
            src_h: 4,
            dst_w: 8,
            dst_x: 2,
            dst_y: 2,
            width: 4,
            height: 4,
            ..BlitOp::default()
        };
        engine
            .bitblt_op(&src.words, &mut dst.words, &op, None)
            .expect("offset copy should succeed");
        for y in 0..8u32 {
            for x in 0..8u32 {
                let inside = (2..6).contains(&x) && (2..6).contains(&y);
                let expected = if inside {
                    u32::from(((x - 2) ^ (y - 2)) & 1 == 0)
                } else {
                    0
                };
                assert_eq!(dst.get(x, y), expected, "pixel ({x}, {y}) on {backend:?}");
            }
        }
    }
}

#[test]
fn large_aligned_copy() {
    for backend in ALL_BACKENDS {
        let mut src = BitBuffer::new(1024, 1024);
        for (index, word) in src.words.iter_mut().enumerate() {
            if index % 32 == 0 {
                *word = 0xAAAA_AAAA;
            }
        }
        let mut dst = BitBuffer::new(1024, 1024);
        let mut engine = verified_engine(backend);
        engine
            .bitblt_op(&src.words, &mut dst.words, &full_copy_op(1024), None)
            .expect("large aligned copy should succeed");
        assert_eq!(dst.words, src.words, "backend {:?}", backend);
    }
}

#[test]
fn non_aligned_shift_leaves_outside_pixels_untouched() {
    for backend in ALL_BACKENDS {
        let src = BitBuffer::checkerboard(32, 32, 0);
        let mut dst = BitBuffer::new(64, 32);
        for word in &mut dst.words {
            *word = 0x5A5A_5A5A;
        }
        let before = dst.clone();
        let mut engine = verified_engine(backend);
        let op = BlitOp {
            src_w: 32,
            src_h: 32,
            src_x: 3,
            dst_w: 64,
            dst_x: 5,
            width: 27,
            height: 32,
            ..BlitOp::default()
        };
        engine
            .bitblt_op(&src.words, &mut dst.words, &op, None)
            .expect("shifted copy should succeed");
        for y in 0..32u32 {
            for x in 0..64u32 {
                let expected = if (5..32).contains(&x) {
                    src.get(x - 5 + 3, y)
                } else {
                    before.get(x, y)
                };
                assert_eq!(dst.get(x, y), expected, "pixel ({x}, {y}) on {backend:?}");
            }
        }
    }
}

/// Delegates to the textual back-end, then flips the destination's (0, 0)
/// bit, exactly what a miscompiled specialization would look like.
#[derive(Debug)]
struct BitFlippingBackend {
    inner: TextualBackend,
}

impl Backend for BitFlippingBackend {
    fn name(&self) -> &'static str {
        "textual"
    }

    fn generate(&self, params: &CompileParams) -> Result<GeneratedCode, EngineError> {
        self.inner.generate(params)
    }

    fn compile(&self, params: &CompileParams) -> Result<Arc<Artifact>, EngineError> {
        self.inner.compile(params)
    }

    fn execute(
        &self,
        artifact: &Artifact,
        src: &[u32],
        dst: &mut [u32],
        op: &BlitOp,
    ) -> Result<(), EngineError> {
        self.inner.execute(artifact, src, dst, op)?;
        dst[0] ^= 1;
        Ok(())
    }

    fn clear_cache(&self) {
        self.inner.clear_cache();
    }

    fn stats(&self) -> BackendStats {
        self.inner.stats()
    }
}

#[test]
fn verification_failure_reports_the_flipped_pixel() {
    let src = BitBuffer::checkerboard(8, 8, 0);
    let mut dst = BitBuffer::new(8, 8);
    let config = EngineConfig {
        verify: true,
        ..EngineConfig::default()
    };
    let mut engine = Engine::with_backend(
        config,
        Box::new(BitFlippingBackend {
            inner: TextualBackend::new(),
        }),
    );
    let err = engine
        .bitblt_op(&src.words, &mut dst.words, &full_copy_op(8), None)
        .expect_err("tampered output must fail verification");
    match err {
        EngineError::VerificationMismatch {
            x,
            y,
            expected,
            actual,
        } => {
            assert_eq!((x, y), (0, 0));
            // (0, 0) of the checkerboard is set; the tamper cleared it.
            assert_eq!(expected, 1);
            assert_eq!(actual, 0);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn oracle_equivalence_across_backends_and_shapes() {
    let shapes = [
        BlitOp {
            src_w: 40,
            src_h: 24,
            src_x: 7,
            src_y: 3,
            dst_w: 40,
            dst_x: 11,
            dst_y: 5,
            width: 19,
            height: 13,
            ..BlitOp::default()
        },
        BlitOp {
            src_w: 64,
            src_h: 8,
            src_x: 31,
            dst_w: 96,
            dst_x: 33,
            dst_y: 1,
            width: 33,
            height: 7,
            ..BlitOp::default()
        },
        BlitOp {
            src_w: 33,
            src_h: 5,
            src_x: 1,
            src_y: 1,
            dst_w: 33,
            dst_x: 0,
            dst_y: 0,
            width: 32,
            height: 4,
            ..BlitOp::default()
        },
    ];
    for backend in ALL_BACKENDS {
        for (index, op) in shapes.iter().enumerate() {
            let mut src = BitBuffer::new(op.src_w, op.src_h);
            fill_lcg(&mut src, 0x1234 + index as u32);
            let mut dst = BitBuffer::new(op.dst_w, op.dst_y + op.height);
            fill_lcg(&mut dst, 0x9876 + index as u32);
            let mut engine = verified_engine(backend);
            assert_matches_reference(&mut engine, &src, &mut dst, op);
        }
    }
}

#[test]
fn identity_copy_leaves_the_buffer_unchanged() {
    for backend in ALL_BACKENDS {
        let mut buffer = BitBuffer::new(40, 20);
        fill_lcg(&mut buffer, 0xC0FFEE);
        let snapshot = buffer.words.clone();
        let op = BlitOp {
            src_w: 40,
            src_h: 20,
            src_x: 4,
            src_y: 2,
            dst_w: 40,
            dst_x: 4,
            dst_y: 2,
            width: 20,
            height: 10,
            ..BlitOp::default()
        };
        let src = buffer.words.clone();
        let mut engine = verified_engine(backend);
        engine
            .bitblt_op(&src, &mut buffer.words, &op, None)
            .expect("identity copy should succeed");
        assert_eq!(buffer.words, snapshot, "backend {:?}", backend);
    }
}

#[test]
fn use_specialized_false_runs_the_oracle_only() {
    let src = BitBuffer::checkerboard(8, 8, 0);
    let mut dst = BitBuffer::new(8, 8);
    let mut engine = Engine::new(EngineConfig {
        use_specialized: false,
        ..EngineConfig::default()
    });
    engine
        .bitblt_op(&src.words, &mut dst.words, &full_copy_op(8), None)
        .expect("oracle-only call should succeed");
    assert_eq!(dst.words, src.words);
    assert!(engine.backend_stats(BackendKind::Textual).is_none());
}

#[test]
fn per_call_options_override_the_engine_config() {
    let src = BitBuffer::checkerboard(8, 8, 0);
    let mut dst = BitBuffer::new(8, 8);
    let mut engine = Engine::new(EngineConfig::default());
    let options = CallOptions {
        backend: Some(BackendKind::Binary),
        verify: Some(true),
        ..CallOptions::default()
    };
    engine
        .bitblt_op(&src.words, &mut dst.words, &full_copy_op(8), Some(options))
        .expect("override call should succeed");
    assert_eq!(dst.words, src.words);
    assert!(engine.backend_stats(BackendKind::Binary).is_some());
    assert!(engine.backend_stats(BackendKind::Textual).is_none());
}

#[test]
fn binary_backend_rejects_buffers_beyond_memory_limits() {
    // Sixteen 64 KiB pages hold 1 MiB; two 520 KiB buffers do not fit.
    let words = 2048 / 32 * 2080;
    let src = vec![0u32; words];
    let mut dst = vec![0u32; words];
    let mut engine = Engine::new(EngineConfig {
        backend: BackendKind::Binary,
        ..EngineConfig::default()
    });
    let op = BlitOp {
        src_w: 2048,
        src_h: 2080,
        dst_w: 2048,
        width: 32,
        height: 1,
        ..BlitOp::default()
    };
    let err = engine
        .bitblt_op(&src, &mut dst, &op, None)
        .expect_err("staging past the page limit must fail");
    assert!(matches!(err, EngineError::MemoryCapacity { .. }));
}

#[test]
fn factory_rejects_unknown_backend_names() {
    let err = create_backend("quantum").expect_err("unknown back-end must fail");
    assert!(matches!(err, EngineError::UnknownBackEnd(name) if name == "quantum"));
}
