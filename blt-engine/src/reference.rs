//! The reference scan-based BitBLT. Known-correct, bit-by-bit, forward
//! row-major; every specialized back-end must match it exactly within the
//! copy rectangle and leave all other destination bits untouched.

use crate::buffer::{get_pixel, set_pixel};
use crate::params::BlitOp;

pub fn reference_bitblt(src: &[u32], dst: &mut [u32], op: &BlitOp) {
    for y in 0..op.height {
        let src_y = op.src_y + y;
        let dst_y = op.dst_y + y;
        for x in 0..op.width {
            let bit = get_pixel(src, op.src_w, op.src_x + x, src_y);
            set_pixel(dst, op.dst_w, op.dst_x + x, dst_y, bit);
        }
    }
}
