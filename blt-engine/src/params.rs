use serde::{Deserialize, Serialize};

/// One BitBLT call: source and destination geometry, offsets, and the copy
/// rectangle. `src_h` is carried for bounds checks; the transfer itself
/// does not depend on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlitOp {
    pub src_w: u32,
    pub src_h: u32,
    pub src_x: u32,
    pub src_y: u32,
    pub dst_w: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub width: u32,
    pub height: u32,
}

impl BlitOp {
    /// Argument vector in the exported entry's slot order, minus the two
    /// buffer pointers.
    pub fn dims(&self) -> [u32; 9] {
        [
            self.src_w, self.src_h, self.src_x, self.src_y, self.dst_w, self.dst_x, self.dst_y,
            self.width, self.height,
        ]
    }
}

/// Dimensions the caller chose to freeze into a specialization. `None`
/// means runtime-variable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlitShape {
    pub src_w: Option<u32>,
    pub src_h: Option<u32>,
    pub src_x: Option<u32>,
    pub src_y: Option<u32>,
    pub dst_w: Option<u32>,
    pub dst_x: Option<u32>,
    pub dst_y: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl BlitShape {
    /// Freezes every dimension of `op`, the dispatcher's default.
    pub fn frozen(op: &BlitOp) -> Self {
        Self {
            src_w: Some(op.src_w),
            src_h: Some(op.src_h),
            src_x: Some(op.src_x),
            src_y: Some(op.src_y),
            dst_w: Some(op.dst_w),
            dst_x: Some(op.dst_x),
            dst_y: Some(op.dst_y),
            width: Some(op.width),
            height: Some(op.height),
        }
    }
}

/// Emitter flags. `debug` only adds logging and is excluded from
/// fingerprints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerFlags {
    pub unroll: bool,
    pub inline_constants: bool,
    pub align_opt: bool,
    pub debug: bool,
}

/// Everything a back-end needs to produce one specialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompileParams {
    pub shape: BlitShape,
    pub flags: CompilerFlags,
}
