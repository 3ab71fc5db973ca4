//! Generates the function body implementing one BitBLT call: a scalar
//! bit-by-bit loop nest, or the whole-word variant for word-aligned
//! operations. Both produce identical destination contents.

use crate::leb128::{write_sleb128, write_uleb128};
use crate::opcodes::{BLOCKTYPE_EMPTY, op, valtype};

/// Parameter slot order of the exported entry.
pub mod slot {
    pub const SRC_PTR: u32 = 0;
    pub const SRC_W: u32 = 1;
    pub const SRC_H: u32 = 2;
    pub const SRC_X: u32 = 3;
    pub const SRC_Y: u32 = 4;
    pub const DST_PTR: u32 = 5;
    pub const DST_W: u32 = 6;
    pub const DST_X: u32 = 7;
    pub const DST_Y: u32 = 8;
    pub const WIDTH: u32 = 9;
    pub const HEIGHT: u32 = 10;

    pub const SRC_STRIDE_WORDS: u32 = 11;
    pub const DST_STRIDE_WORDS: u32 = 12;
    pub const Y: u32 = 13;
    pub const SRC_Y_ABS: u32 = 14;
    pub const DST_Y_ABS: u32 = 15;
    pub const X: u32 = 16;
    pub const SRC_BIT: u32 = 17;
    pub const DST_BIT_POS: u32 = 18;
    pub const WORD_TMP: u32 = 19;
}

pub const PARAM_COUNT: u32 = 11;
pub const EXTRA_LOCALS: u32 = 9;

pub struct BodyBuilder {
    code: Vec<u8>,
}

impl Default for BodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self { code: Vec::new() }
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    fn op(&mut self, opcode: u8) {
        self.code.push(opcode);
    }

    pub fn block(&mut self) {
        self.op(op::BLOCK);
        self.code.push(BLOCKTYPE_EMPTY);
    }

    pub fn loop_(&mut self) {
        self.op(op::LOOP);
        self.code.push(BLOCKTYPE_EMPTY);
    }

    pub fn if_(&mut self) {
        self.op(op::IF);
        self.code.push(BLOCKTYPE_EMPTY);
    }

    pub fn else_(&mut self) {
        self.op(op::ELSE);
    }

    pub fn end(&mut self) {
        self.op(op::END);
    }

    pub fn br(&mut self, depth: u32) {
        self.op(op::BR);
        write_uleb128(&mut self.code, depth);
    }

    pub fn br_if(&mut self, depth: u32) {
        self.op(op::BR_IF);
        write_uleb128(&mut self.code, depth);
    }

    pub fn local_get(&mut self, index: u32) {
        self.op(op::LOCAL_GET);
        write_uleb128(&mut self.code, index);
    }

    pub fn local_set(&mut self, index: u32) {
        self.op(op::LOCAL_SET);
        write_uleb128(&mut self.code, index);
    }

    pub fn local_tee(&mut self, index: u32) {
        self.op(op::LOCAL_TEE);
        write_uleb128(&mut self.code, index);
    }

    pub fn i32_const(&mut self, value: i32) {
        self.op(op::I32_CONST);
        write_sleb128(&mut self.code, value);
    }

    /// 4-byte-aligned word load at offset 0.
    pub fn i32_load(&mut self) {
        self.op(op::I32_LOAD);
        write_uleb128(&mut self.code, 2);
        write_uleb128(&mut self.code, 0);
    }

    pub fn i32_store(&mut self) {
        self.op(op::I32_STORE);
        write_uleb128(&mut self.code, 2);
        write_uleb128(&mut self.code, 0);
    }

    pub fn i32_eqz(&mut self) {
        self.op(op::I32_EQZ);
    }

    pub fn i32_eq(&mut self) {
        self.op(op::I32_EQ);
    }

    pub fn i32_lt_u(&mut self) {
        self.op(op::I32_LT_U);
    }

    pub fn i32_add(&mut self) {
        self.op(op::I32_ADD);
    }

    pub fn i32_mul(&mut self) {
        self.op(op::I32_MUL);
    }

    pub fn i32_and(&mut self) {
        self.op(op::I32_AND);
    }

    pub fn i32_or(&mut self) {
        self.op(op::I32_OR);
    }

    pub fn i32_xor(&mut self) {
        self.op(op::I32_XOR);
    }

    pub fn i32_shl(&mut self) {
        self.op(op::I32_SHL);
    }

    pub fn i32_shr_u(&mut self) {
        self.op(op::I32_SHR_U);
    }
}

/// Complete function body (local declarations followed by the expression)
/// for the scalar bit-copy loop nest.
pub fn scalar_body() -> Vec<u8> {
    let mut body = declare_locals();
    let mut b = BodyBuilder::new();

    emit_stride_prologue(&mut b);

    // Outer loop over rows.
    b.i32_const(0);
    b.local_set(slot::Y);
    b.block();
    b.loop_();
    emit_loop_guard(&mut b, slot::Y, slot::HEIGHT);

    b.local_get(slot::SRC_Y);
    b.local_get(slot::Y);
    b.i32_add();
    b.local_set(slot::SRC_Y_ABS);
    b.local_get(slot::DST_Y);
    b.local_get(slot::Y);
    b.i32_add();
    b.local_set(slot::DST_Y_ABS);

    // Inner loop over pixels.
    b.i32_const(0);
    b.local_set(slot::X);
    b.block();
    b.loop_();
    emit_loop_guard(&mut b, slot::X, slot::WIDTH);

    // srcBit = (src[(srcXAbs >> 5) + srcYAbs * srcStride] >>> (srcXAbs & 31)) & 1
    b.local_get(slot::SRC_X);
    b.local_get(slot::X);
    b.i32_add();
    b.local_tee(slot::WORD_TMP);
    b.i32_const(5);
    b.i32_shr_u();
    b.local_get(slot::SRC_Y_ABS);
    b.local_get(slot::SRC_STRIDE_WORDS);
    b.i32_mul();
    b.i32_add();
    b.i32_const(2);
    b.i32_shl();
    b.local_get(slot::SRC_PTR);
    b.i32_add();
    b.i32_load();
    b.local_get(slot::WORD_TMP);
    b.i32_const(31);
    b.i32_and();
    b.i32_shr_u();
    b.i32_const(1);
    b.i32_and();
    b.local_set(slot::SRC_BIT);

    // dstBitPos = (dstX + x) & 31
    b.local_get(slot::DST_X);
    b.local_get(slot::X);
    b.i32_add();
    b.i32_const(31);
    b.i32_and();
    b.local_set(slot::DST_BIT_POS);

    // wordTmp = dst word
    emit_dst_word_address(&mut b);
    b.i32_load();
    b.local_set(slot::WORD_TMP);

    // Set or clear the destination bit.
    b.local_get(slot::SRC_BIT);
    b.i32_const(1);
    b.i32_eq();
    b.if_();
    b.local_get(slot::WORD_TMP);
    b.i32_const(1);
    b.local_get(slot::DST_BIT_POS);
    b.i32_shl();
    b.i32_or();
    b.local_set(slot::WORD_TMP);
    b.else_();
    b.local_get(slot::WORD_TMP);
    b.i32_const(1);
    b.local_get(slot::DST_BIT_POS);
    b.i32_shl();
    b.i32_const(-1);
    b.i32_xor();
    b.i32_and();
    b.local_set(slot::WORD_TMP);
    b.end();

    emit_dst_word_address(&mut b);
    b.local_get(slot::WORD_TMP);
    b.i32_store();

    emit_increment(&mut b, slot::X);
    b.br(0);
    b.end();
    b.end();

    emit_increment(&mut b, slot::Y);
    b.br(0);
    b.end();
    b.end();

    b.end(); // function
    body.extend_from_slice(&b.finish());
    body
}

/// Whole-word copy for word-aligned operations: width, srcX and dstX are
/// all multiples of 32, so each row is `width >> 5` straight word copies.
pub fn aligned_body() -> Vec<u8> {
    let mut body = declare_locals();
    let mut b = BodyBuilder::new();

    emit_stride_prologue(&mut b);

    b.i32_const(0);
    b.local_set(slot::Y);
    b.block();
    b.loop_();
    emit_loop_guard(&mut b, slot::Y, slot::HEIGHT);

    b.local_get(slot::SRC_Y);
    b.local_get(slot::Y);
    b.i32_add();
    b.local_set(slot::SRC_Y_ABS);
    b.local_get(slot::DST_Y);
    b.local_get(slot::Y);
    b.i32_add();
    b.local_set(slot::DST_Y_ABS);

    // x counts words within the row.
    b.i32_const(0);
    b.local_set(slot::X);
    b.block();
    b.loop_();
    b.local_get(slot::X);
    b.local_get(slot::WIDTH);
    b.i32_const(5);
    b.i32_shr_u();
    b.i32_lt_u();
    b.i32_eqz();
    b.br_if(1);

    // dst[(dstX >> 5) + x + dstYAbs * dstStride] = src[(srcX >> 5) + x + srcYAbs * srcStride]
    emit_word_address(&mut b, slot::DST_X, slot::DST_Y_ABS, slot::DST_STRIDE_WORDS, slot::DST_PTR);
    emit_word_address(&mut b, slot::SRC_X, slot::SRC_Y_ABS, slot::SRC_STRIDE_WORDS, slot::SRC_PTR);
    b.i32_load();
    b.i32_store();

    emit_increment(&mut b, slot::X);
    b.br(0);
    b.end();
    b.end();

    emit_increment(&mut b, slot::Y);
    b.br(0);
    b.end();
    b.end();

    b.end();
    body.extend_from_slice(&b.finish());
    body
}

fn declare_locals() -> Vec<u8> {
    // One run of nine i32 locals after the eleven parameters.
    let mut out = Vec::new();
    write_uleb128(&mut out, 1);
    write_uleb128(&mut out, EXTRA_LOCALS);
    out.push(valtype::I32);
    out
}

fn emit_stride_prologue(b: &mut BodyBuilder) {
    // srcStrideWords = (srcW + 31) >> 5; dstStrideWords = (dstW + 31) >> 5
    b.local_get(slot::SRC_W);
    b.i32_const(31);
    b.i32_add();
    b.i32_const(5);
    b.i32_shr_u();
    b.local_set(slot::SRC_STRIDE_WORDS);
    b.local_get(slot::DST_W);
    b.i32_const(31);
    b.i32_add();
    b.i32_const(5);
    b.i32_shr_u();
    b.local_set(slot::DST_STRIDE_WORDS);
}

fn emit_loop_guard(b: &mut BodyBuilder, counter: u32, limit: u32) {
    // counter < limit, negated, exits the enclosing block.
    b.local_get(counter);
    b.local_get(limit);
    b.i32_lt_u();
    b.i32_eqz();
    b.br_if(1);
}

fn emit_increment(b: &mut BodyBuilder, counter: u32) {
    b.local_get(counter);
    b.i32_const(1);
    b.i32_add();
    b.local_set(counter);
}

/// Byte address of the destination word for the scalar loop:
/// `dstPtr + (((dstX + x) >> 5) + dstYAbs * dstStride) * 4`.
fn emit_dst_word_address(b: &mut BodyBuilder) {
    b.local_get(slot::DST_X);
    b.local_get(slot::X);
    b.i32_add();
    b.i32_const(5);
    b.i32_shr_u();
    b.local_get(slot::DST_Y_ABS);
    b.local_get(slot::DST_STRIDE_WORDS);
    b.i32_mul();
    b.i32_add();
    b.i32_const(2);
    b.i32_shl();
    b.local_get(slot::DST_PTR);
    b.i32_add();
}

/// Byte address of `(x_origin >> 5) + x + y_abs * stride`, for the aligned
/// word loop.
fn emit_word_address(b: &mut BodyBuilder, x_origin: u32, y_abs: u32, stride: u32, base: u32) {
    b.local_get(x_origin);
    b.i32_const(5);
    b.i32_shr_u();
    b.local_get(slot::X);
    b.i32_add();
    b.local_get(y_abs);
    b.local_get(stride);
    b.i32_mul();
    b.i32_add();
    b.i32_const(2);
    b.i32_shl();
    b.local_get(base);
    b.i32_add();
}
