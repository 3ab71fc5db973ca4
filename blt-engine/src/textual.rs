//! Textual back-end: emits a specialized scan routine as assembly text for
//! the in-process scan machine, then materializes it through the
//! assembler. Frozen dimensions can be inlined as literals; with a frozen
//! height the row loop is unrolled, and with a frozen width each row is
//! emitted pixel by pixel.

use std::sync::Arc;

use blt_vm::{assemble_scan, run_scan};
use tracing::debug;

use crate::backend::{Artifact, ArtifactCache, Backend, BackendStats, GeneratedCode};
use crate::buffer::stride_words;
use crate::error::EngineError;
use crate::params::{BlitOp, CompileParams};

/// Unrolled forms above these sizes would dwarf the looped routine; the
/// generator falls back to loops instead.
const MAX_UNROLL_ROWS: u32 = 64;
const MAX_UNROLL_PIXELS: u64 = 64;

pub struct TextualBackend {
    cache: ArtifactCache,
}

impl std::fmt::Debug for TextualBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextualBackend").finish()
    }
}

impl Default for TextualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TextualBackend {
    pub fn new() -> Self {
        Self {
            cache: ArtifactCache::new(),
        }
    }
}

impl Backend for TextualBackend {
    fn name(&self) -> &'static str {
        "textual"
    }

    fn generate(&self, params: &CompileParams) -> Result<GeneratedCode, EngineError> {
        Ok(GeneratedCode::Text(generate_scan_source(params)))
    }

    fn compile(&self, params: &CompileParams) -> Result<Arc<Artifact>, EngineError> {
        let key = self.fingerprint(params);
        let debug_source = params.flags.debug;
        self.cache.get_or_compile(&key, || {
            let source = generate_scan_source(params);
            if debug_source {
                debug!(target: "blt::textual", %key, source = %source, "generated scan source");
            }
            let program = assemble_scan(&source)?;
            Ok(Artifact::Scan(program))
        })
    }

    fn execute(
        &self,
        artifact: &Artifact,
        src: &[u32],
        dst: &mut [u32],
        op: &BlitOp,
    ) -> Result<(), EngineError> {
        let Artifact::Scan(program) = artifact else {
            return Err(EngineError::Unsupported(
                "textual back-end received a non-scan artifact",
            ));
        };
        run_scan(program, src, dst, &op.dims())?;
        Ok(())
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }

    fn stats(&self) -> BackendStats {
        self.cache.stats()
    }
}

/// A value the generated source either reads from an argument slot or
/// carries as an inlined literal.
#[derive(Clone, Copy)]
enum Operand {
    Slot(&'static str),
    Lit(u32),
}

impl Operand {
    fn push(&self, out: &mut String) {
        match self {
            Operand::Slot(name) => push_line(out, &format!("ldloc {name}")),
            Operand::Lit(value) => push_line(out, &format!("ldc {value}")),
        }
    }
}

struct Dims {
    src_x: Operand,
    src_y: Operand,
    dst_x: Operand,
    dst_y: Operand,
    width: Operand,
    height: Operand,
    src_stride: Operand,
    dst_stride: Operand,
}

pub fn generate_scan_source(params: &CompileParams) -> String {
    let shape = &params.shape;
    let inline = params.flags.inline_constants;
    let dims = Dims {
        src_x: operand("src_x", shape.src_x, inline),
        src_y: operand("src_y", shape.src_y, inline),
        dst_x: operand("dst_x", shape.dst_x, inline),
        dst_y: operand("dst_y", shape.dst_y, inline),
        width: operand("width", shape.width, inline),
        height: operand("height", shape.height, inline),
        src_stride: stride_operand("src_stride", shape.src_w, inline),
        dst_stride: stride_operand("dst_stride", shape.dst_w, inline),
    };

    let mut out = String::new();
    push_line(&mut out, "# 1bpp scan blit");
    for name in [
        "src_w", "src_h", "src_x", "src_y", "dst_w", "dst_x", "dst_y", "width", "height",
    ] {
        push_line(&mut out, &format!(".arg {name}"));
    }

    match unroll_plan(params) {
        Plan::Full { width, height } => emit_full_unroll(&mut out, &dims, width, height),
        Plan::Rows(height) => emit_row_unroll(&mut out, &dims, height),
        Plan::Loops => emit_loops(&mut out, &dims),
    }
    out
}

enum Plan {
    Loops,
    Rows(u32),
    Full { width: u32, height: u32 },
}

fn unroll_plan(params: &CompileParams) -> Plan {
    if !params.flags.unroll {
        return Plan::Loops;
    }
    let Some(height) = params.shape.height else {
        return Plan::Loops;
    };
    if height > MAX_UNROLL_ROWS {
        return Plan::Loops;
    }
    if let Some(width) = params.shape.width
        && u64::from(width) * u64::from(height) <= MAX_UNROLL_PIXELS
    {
        return Plan::Full { width, height };
    }
    Plan::Rows(height)
}

fn emit_loops(out: &mut String, dims: &Dims) {
    declare_stride_locals(out, dims);
    for local in [
        "y",
        "src_y_abs",
        "dst_y_abs",
        "x",
        "src_x_abs",
        "dst_x_abs",
        "src_bit",
        "dst_bit_pos",
        "dst_word",
    ] {
        push_line(out, &format!(".local {local}"));
    }
    emit_stride_prologue(out, dims);

    push_line(out, "ldc 0");
    push_line(out, "stloc y");
    push_line(out, ".label row_loop");
    push_line(out, "ldloc y");
    dims.height.push(out);
    push_line(out, "cltu");
    push_line(out, "brfalse done");

    emit_sum_into(out, dims.src_y, Operand::Slot("y"), "src_y_abs");
    emit_sum_into(out, dims.dst_y, Operand::Slot("y"), "dst_y_abs");

    push_line(out, "ldc 0");
    push_line(out, "stloc x");
    push_line(out, ".label col_loop");
    push_line(out, "ldloc x");
    dims.width.push(out);
    push_line(out, "cltu");
    push_line(out, "brfalse row_next");

    emit_sum_into(out, dims.src_x, Operand::Slot("x"), "src_x_abs");
    emit_sum_into(out, dims.dst_x, Operand::Slot("x"), "dst_x_abs");
    emit_pixel_body(
        out,
        dims,
        "src_x_abs",
        "dst_x_abs",
        "src_y_abs",
        "dst_y_abs",
        "px",
    );

    emit_increment(out, "x");
    push_line(out, "br col_loop");
    push_line(out, ".label row_next");
    emit_increment(out, "y");
    push_line(out, "br row_loop");
    push_line(out, ".label done");
    push_line(out, "ret");
}

fn emit_row_unroll(out: &mut String, dims: &Dims, height: u32) {
    declare_stride_locals(out, dims);
    for local in [
        "x",
        "src_x_abs",
        "dst_x_abs",
        "src_bit",
        "dst_bit_pos",
        "dst_word",
    ] {
        push_line(out, &format!(".local {local}"));
    }
    for k in 0..height {
        push_line(out, &format!(".local src_y_abs_{k}"));
        push_line(out, &format!(".local dst_y_abs_{k}"));
    }
    emit_stride_prologue(out, dims);

    for k in 0..height {
        let src_y_abs = format!("src_y_abs_{k}");
        let dst_y_abs = format!("dst_y_abs_{k}");
        push_line(out, &format!("# row {k}"));
        emit_sum_into(out, dims.src_y, Operand::Lit(k), &src_y_abs);
        emit_sum_into(out, dims.dst_y, Operand::Lit(k), &dst_y_abs);

        push_line(out, "ldc 0");
        push_line(out, "stloc x");
        push_line(out, &format!(".label col_loop_{k}"));
        push_line(out, "ldloc x");
        dims.width.push(out);
        push_line(out, "cltu");
        push_line(out, &format!("brfalse row_end_{k}"));

        emit_sum_into(out, dims.src_x, Operand::Slot("x"), "src_x_abs");
        emit_sum_into(out, dims.dst_x, Operand::Slot("x"), "dst_x_abs");
        emit_pixel_body(
            out,
            dims,
            "src_x_abs",
            "dst_x_abs",
            &src_y_abs,
            &dst_y_abs,
            &format!("r{k}"),
        );

        emit_increment(out, "x");
        push_line(out, &format!("br col_loop_{k}"));
        push_line(out, &format!(".label row_end_{k}"));
    }
    push_line(out, "ret");
}

fn emit_full_unroll(out: &mut String, dims: &Dims, width: u32, height: u32) {
    declare_stride_locals(out, dims);
    for local in ["src_bit", "dst_bit_pos", "dst_word"] {
        push_line(out, &format!(".local {local}"));
    }
    for k in 0..height {
        push_line(out, &format!(".local src_y_abs_{k}"));
        push_line(out, &format!(".local dst_y_abs_{k}"));
    }
    for n in 0..u64::from(width) * u64::from(height) {
        push_line(out, &format!(".local src_x_abs_{n}"));
        push_line(out, &format!(".local dst_x_abs_{n}"));
    }
    emit_stride_prologue(out, dims);

    for k in 0..height {
        let src_y_abs = format!("src_y_abs_{k}");
        let dst_y_abs = format!("dst_y_abs_{k}");
        push_line(out, &format!("# row {k}"));
        emit_sum_into(out, dims.src_y, Operand::Lit(k), &src_y_abs);
        emit_sum_into(out, dims.dst_y, Operand::Lit(k), &dst_y_abs);

        for j in 0..width {
            let n = u64::from(k) * u64::from(width) + u64::from(j);
            let src_x_abs = format!("src_x_abs_{n}");
            let dst_x_abs = format!("dst_x_abs_{n}");
            emit_sum_into(out, dims.src_x, Operand::Lit(j), &src_x_abs);
            emit_sum_into(out, dims.dst_x, Operand::Lit(j), &dst_x_abs);
            emit_pixel_body(
                out,
                dims,
                &src_x_abs,
                &dst_x_abs,
                &src_y_abs,
                &dst_y_abs,
                &format!("p{n}"),
            );
        }
    }
    push_line(out, "ret");
}

/// Extracts the source bit, then sets or clears it in the destination word.
fn emit_pixel_body(
    out: &mut String,
    dims: &Dims,
    src_x_abs: &str,
    dst_x_abs: &str,
    src_y_abs: &str,
    dst_y_abs: &str,
    suffix: &str,
) {
    // src_bit = (src[(src_x_abs >> 5) + src_y_abs * src_stride] >> (src_x_abs & 31)) & 1
    push_line(out, &format!("ldloc {src_x_abs}"));
    push_line(out, "ldc 5");
    push_line(out, "shr");
    push_line(out, &format!("ldloc {src_y_abs}"));
    dims.src_stride.push(out);
    push_line(out, "mul");
    push_line(out, "add");
    push_line(out, "ldw src");
    push_line(out, &format!("ldloc {src_x_abs}"));
    push_line(out, "ldc 31");
    push_line(out, "and");
    push_line(out, "shr");
    push_line(out, "ldc 1");
    push_line(out, "and");
    push_line(out, "stloc src_bit");

    push_line(out, &format!("ldloc {dst_x_abs}"));
    push_line(out, "ldc 31");
    push_line(out, "and");
    push_line(out, "stloc dst_bit_pos");
    push_line(out, &format!("ldloc {dst_x_abs}"));
    push_line(out, "ldc 5");
    push_line(out, "shr");
    push_line(out, &format!("ldloc {dst_y_abs}"));
    dims.dst_stride.push(out);
    push_line(out, "mul");
    push_line(out, "add");
    push_line(out, "stloc dst_word");

    push_line(out, "ldloc src_bit");
    push_line(out, "ldc 1");
    push_line(out, "ceq");
    push_line(out, &format!("brfalse clear_{suffix}"));
    push_line(out, "ldloc dst_word");
    push_line(out, "ldloc dst_word");
    push_line(out, "ldw dst");
    push_line(out, "ldc 1");
    push_line(out, "ldloc dst_bit_pos");
    push_line(out, "shl");
    push_line(out, "or");
    push_line(out, "stw dst");
    push_line(out, &format!("br next_{suffix}"));
    push_line(out, &format!(".label clear_{suffix}"));
    push_line(out, "ldloc dst_word");
    push_line(out, "ldloc dst_word");
    push_line(out, "ldw dst");
    push_line(out, "ldc 1");
    push_line(out, "ldloc dst_bit_pos");
    push_line(out, "shl");
    push_line(out, "ldc -1");
    push_line(out, "xor");
    push_line(out, "and");
    push_line(out, "stw dst");
    push_line(out, &format!(".label next_{suffix}"));
}

fn operand(name: &'static str, value: Option<u32>, inline: bool) -> Operand {
    match value {
        Some(value) if inline => Operand::Lit(value),
        _ => Operand::Slot(name),
    }
}

fn stride_operand(name: &'static str, width: Option<u32>, inline: bool) -> Operand {
    match width {
        Some(width) if inline => Operand::Lit(stride_words(width)),
        _ => Operand::Slot(name),
    }
}

fn declare_stride_locals(out: &mut String, dims: &Dims) {
    if matches!(dims.src_stride, Operand::Slot(_)) {
        push_line(out, ".local src_stride");
    }
    if matches!(dims.dst_stride, Operand::Slot(_)) {
        push_line(out, ".local dst_stride");
    }
}

/// Computes any non-literal strides: `(w + 31) >> 5`.
fn emit_stride_prologue(out: &mut String, dims: &Dims) {
    if matches!(dims.src_stride, Operand::Slot(_)) {
        push_line(out, "ldloc src_w");
        push_line(out, "ldc 31");
        push_line(out, "add");
        push_line(out, "ldc 5");
        push_line(out, "shr");
        push_line(out, "stloc src_stride");
    }
    if matches!(dims.dst_stride, Operand::Slot(_)) {
        push_line(out, "ldloc dst_w");
        push_line(out, "ldc 31");
        push_line(out, "add");
        push_line(out, "ldc 5");
        push_line(out, "shr");
        push_line(out, "stloc dst_stride");
    }
}

/// `dest = a + b`, folding to a single literal when both sides are known.
fn emit_sum_into(out: &mut String, a: Operand, b: Operand, dest: &str) {
    if let (Operand::Lit(lhs), Operand::Lit(rhs)) = (a, b) {
        push_line(out, &format!("ldc {}", lhs.wrapping_add(rhs)));
    } else {
        a.push(out);
        b.push(out);
        push_line(out, "add");
    }
    push_line(out, &format!("stloc {dest}"));
}

fn emit_increment(out: &mut String, counter: &str) {
    push_line(out, &format!("ldloc {counter}"));
    push_line(out, "ldc 1");
    push_line(out, "add");
    push_line(out, &format!("stloc {counter}"));
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}
