//! Pure analysis of compile parameters: which optimizations the emitters
//! could apply to this shape. The dispatcher decides whether to act on the
//! flags (`autospecialize`); the analyzer only reports.

use std::sync::OnceLock;

use blt_vm::{ModuleInstance, encode_module, opcodes};

use crate::params::CompileParams;

/// Unrolling stops paying off past this many pixels.
pub const UNROLL_PIXEL_LIMIT: u64 = 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Analysis {
    pub unroll_small: bool,
    pub word_aligned: bool,
    pub simd_candidate: bool,
}

impl Analysis {
    pub fn can_optimize(&self) -> bool {
        self.unroll_small || self.word_aligned || self.simd_candidate
    }
}

pub fn analyze(params: &CompileParams) -> Analysis {
    let shape = &params.shape;

    let unroll_small = match (shape.width, shape.height) {
        (Some(width), Some(height)) => u64::from(width) * u64::from(height) <= UNROLL_PIXEL_LIMIT,
        _ => false,
    };

    let word_aligned = match (shape.width, shape.src_x, shape.dst_x) {
        (Some(width), Some(src_x), Some(dst_x)) => {
            width > 0 && width % 32 == 0 && src_x % 32 == 0 && dst_x % 32 == 0
        }
        _ => false,
    };

    Analysis {
        unroll_small,
        word_aligned,
        simd_candidate: simd_supported(),
    }
}

/// Probes the module runtime with a body containing a vector opcode. The
/// result is process-wide and memoized; this runtime rejects the vector
/// prefix, so the probe reports false and no vector code is ever emitted.
pub fn simd_supported() -> bool {
    static PROBE: OnceLock<bool> = OnceLock::new();
    *PROBE.get_or_init(|| ModuleInstance::instantiate(&simd_probe_module()).is_ok())
}

fn simd_probe_module() -> Vec<u8> {
    // Locals header (none), one vector opcode, function end.
    let mut body = Vec::new();
    blt_vm::write_uleb128(&mut body, 0);
    body.push(opcodes::op::SIMD_PREFIX);
    blt_vm::write_uleb128(&mut body, 0);
    body.push(opcodes::op::END);
    encode_module(&body, false)
}
