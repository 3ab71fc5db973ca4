//! Textual assembly for scan routines. Directives `.arg NAME`, `.local
//! NAME`, and `.label NAME` declare argument slots, scratch locals, and
//! branch targets; everything else is one mnemonic per line. `#` and `//`
//! start comments.

use std::collections::HashMap;

use super::vm::{ScanOpCode, ScanProgram, Segment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanAsmError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ScanAsmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ScanAsmError {}

struct Fixup {
    at: usize,
    label: String,
    line: usize,
}

/// Byte-level builder with label fixups, used by the text parser below.
pub struct ScanAssembler {
    code: Vec<u8>,
    constants: Vec<u32>,
    constant_index: HashMap<u32, u32>,
    labels: HashMap<String, u32>,
    fixups: Vec<Fixup>,
}

impl Default for ScanAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanAssembler {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            constants: Vec::new(),
            constant_index: HashMap::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    pub fn position(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn label(&mut self, name: &str, line: usize) -> Result<(), ScanAsmError> {
        if self.labels.contains_key(name) {
            return Err(ScanAsmError {
                line,
                message: format!("duplicate label '{name}'"),
            });
        }
        self.labels.insert(name.to_string(), self.position());
        Ok(())
    }

    pub fn add_constant(&mut self, value: u32) -> u32 {
        if let Some(&index) = self.constant_index.get(&value) {
            return index;
        }
        let index = self.constants.len() as u32;
        self.constants.push(value);
        self.constant_index.insert(value, index);
        index
    }

    pub fn ldc(&mut self, value: u32) {
        let index = self.add_constant(value);
        self.emit_opcode(ScanOpCode::Ldc);
        self.emit_u32(index);
    }

    pub fn simple(&mut self, opcode: ScanOpCode) {
        self.emit_opcode(opcode);
    }

    pub fn ldloc(&mut self, index: u16) {
        self.emit_opcode(ScanOpCode::Ldloc);
        self.emit_u16(index);
    }

    pub fn stloc(&mut self, index: u16) {
        self.emit_opcode(ScanOpCode::Stloc);
        self.emit_u16(index);
    }

    pub fn ldw(&mut self, segment: Segment) {
        self.emit_opcode(ScanOpCode::Ldw);
        self.code.push(segment as u8);
    }

    pub fn stw(&mut self, segment: Segment) {
        self.emit_opcode(ScanOpCode::Stw);
        self.code.push(segment as u8);
    }

    pub fn br_label(&mut self, label: &str, line: usize) {
        self.emit_opcode(ScanOpCode::Br);
        self.push_fixup(label, line);
    }

    pub fn brfalse_label(&mut self, label: &str, line: usize) {
        self.emit_opcode(ScanOpCode::Brfalse);
        self.push_fixup(label, line);
    }

    pub fn finish(mut self, arg_count: u8, local_count: u16) -> Result<ScanProgram, ScanAsmError> {
        for fixup in self.fixups.drain(..) {
            let target = self.labels.get(&fixup.label).copied().ok_or(ScanAsmError {
                line: fixup.line,
                message: format!("unknown label '{}'", fixup.label),
            })?;
            self.code[fixup.at..fixup.at + 4].copy_from_slice(&target.to_le_bytes());
        }
        Ok(ScanProgram {
            constants: self.constants,
            code: self.code,
            arg_count,
            local_count,
        })
    }

    fn push_fixup(&mut self, label: &str, line: usize) {
        let at = self.code.len();
        self.emit_u32(0);
        self.fixups.push(Fixup {
            at,
            label: label.to_string(),
            line,
        });
    }

    fn emit_opcode(&mut self, opcode: ScanOpCode) {
        self.code.push(opcode as u8);
    }

    fn emit_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }
}

/// Compiles scan assembly text into a runnable program.
pub fn assemble_scan(source: &str) -> Result<ScanProgram, ScanAsmError> {
    let mut assembler = ScanAssembler::new();
    let mut slots: HashMap<String, u16> = HashMap::new();
    let mut arg_count: u8 = 0;
    let mut next_slot: u16 = 0;
    let mut body_started = false;

    for (line_idx, raw_line) in source.lines().enumerate() {
        let line_no = line_idx + 1;
        let line = strip_comments(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('.') {
            let mut parts = rest.split_whitespace();
            let directive = parts.next().unwrap_or("").to_ascii_lowercase();
            match directive.as_str() {
                "arg" => {
                    if body_started {
                        return Err(ScanAsmError {
                            line: line_no,
                            message: "argument declarations must precede code".to_string(),
                        });
                    }
                    let name = next_token(&mut parts, line_no, "argument name")?;
                    declare_slot(&mut slots, &mut next_slot, name, line_no)?;
                    arg_count = next_slot as u8;
                }
                "local" => {
                    let name = next_token(&mut parts, line_no, "local name")?;
                    declare_slot(&mut slots, &mut next_slot, name, line_no)?;
                }
                "label" => {
                    let name = next_token(&mut parts, line_no, "label name")?;
                    assembler.label(name, line_no)?;
                    body_started = true;
                }
                other => {
                    return Err(ScanAsmError {
                        line: line_no,
                        message: format!("unknown directive '.{other}'"),
                    });
                }
            }
            if parts.next().is_some() {
                return Err(ScanAsmError {
                    line: line_no,
                    message: "unexpected extra tokens".to_string(),
                });
            }
            continue;
        }

        body_started = true;
        let mut parts = line.split_whitespace();
        let op = parts
            .next()
            .ok_or_else(|| ScanAsmError {
                line: line_no,
                message: "missing opcode".to_string(),
            })?
            .to_ascii_lowercase();
        let opcode = ScanOpCode::parse_mnemonic(&op).ok_or_else(|| ScanAsmError {
            line: line_no,
            message: format!("unknown opcode '{op}'"),
        })?;

        match opcode {
            ScanOpCode::Ldc => {
                let token = next_token(&mut parts, line_no, "ldc literal")?;
                let value = parse_word_literal(token, line_no)?;
                assembler.ldc(value);
            }
            ScanOpCode::Br => {
                let label = next_token(&mut parts, line_no, "jump target")?;
                assembler.br_label(label, line_no);
            }
            ScanOpCode::Brfalse => {
                let label = next_token(&mut parts, line_no, "jump target")?;
                assembler.brfalse_label(label, line_no);
            }
            ScanOpCode::Ldloc => {
                let token = next_token(&mut parts, line_no, "slot name")?;
                let index = resolve_slot(&slots, token, line_no)?;
                assembler.ldloc(index);
            }
            ScanOpCode::Stloc => {
                let token = next_token(&mut parts, line_no, "slot name")?;
                let index = resolve_slot(&slots, token, line_no)?;
                assembler.stloc(index);
            }
            ScanOpCode::Ldw => {
                let segment = parse_segment(&mut parts, line_no)?;
                assembler.ldw(segment);
            }
            ScanOpCode::Stw => {
                let segment = parse_segment(&mut parts, line_no)?;
                assembler.stw(segment);
            }
            other => assembler.simple(other),
        }

        if parts.next().is_some() {
            return Err(ScanAsmError {
                line: line_no,
                message: "unexpected extra tokens".to_string(),
            });
        }
    }

    assembler.finish(arg_count, next_slot)
}

fn declare_slot(
    slots: &mut HashMap<String, u16>,
    next_slot: &mut u16,
    name: &str,
    line: usize,
) -> Result<(), ScanAsmError> {
    if slots.contains_key(name) {
        return Err(ScanAsmError {
            line,
            message: format!("duplicate slot '{name}'"),
        });
    }
    let index = *next_slot;
    *next_slot = next_slot.checked_add(1).ok_or(ScanAsmError {
        line,
        message: "slot index overflow".to_string(),
    })?;
    slots.insert(name.to_string(), index);
    Ok(())
}

fn resolve_slot(
    slots: &HashMap<String, u16>,
    token: &str,
    line: usize,
) -> Result<u16, ScanAsmError> {
    slots.get(token).copied().ok_or_else(|| ScanAsmError {
        line,
        message: format!("unknown slot '{token}'"),
    })
}

fn parse_segment<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<Segment, ScanAsmError> {
    let token = next_token(parts, line, "segment")?;
    Segment::parse(token).ok_or_else(|| ScanAsmError {
        line,
        message: format!("unknown segment '{token}', expected src or dst"),
    })
}

fn parse_word_literal(token: &str, line: usize) -> Result<u32, ScanAsmError> {
    let parsed = if let Some(hex) = token.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        token.parse::<i64>()
    };
    match parsed {
        Ok(value) if (-(1i64 << 31)..(1i64 << 32)).contains(&value) => Ok(value as u32),
        _ => Err(ScanAsmError {
            line,
            message: format!("invalid word literal '{token}'"),
        }),
    }
}

fn next_token<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    line: usize,
    what: &str,
) -> Result<&'a str, ScanAsmError> {
    parts.next().ok_or_else(|| ScanAsmError {
        line,
        message: format!("missing {what}"),
    })
}

fn strip_comments(line: &str) -> &str {
    let hash_idx = line.find('#');
    let slash_idx = line.find("//");
    match (hash_idx, slash_idx) {
        (Some(h), Some(s)) => &line[..h.min(s)],
        (Some(h), None) => &line[..h],
        (None, Some(s)) => &line[..s],
        (None, None) => line,
    }
}
