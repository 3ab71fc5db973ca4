//! Single-pass body validation: structured control flow (every `block`,
//! `loop`, and `if` matched by `end`), branch depths in range, and operand
//! stack discipline (empty at each `end` of these void-typed frames). The
//! pass also records the control-matching table the interpreter executes
//! against.

use std::collections::HashMap;

use crate::decode::Module;
use crate::leb128::{read_sleb128, read_uleb128};
use crate::opcodes::{BLOCKTYPE_EMPTY, op};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnknownOpcode { offset: usize, opcode: u8 },
    VectorOpcode { offset: usize },
    UnsupportedBlockType { offset: usize, tag: u8 },
    TruncatedImmediate { offset: usize, opcode: u8 },
    InvalidLocal { offset: usize, index: u32 },
    BranchDepth { offset: usize, depth: u32 },
    StackUnderflow { offset: usize },
    UnbalancedStack { offset: usize },
    ElseWithoutIf { offset: usize },
    UnmatchedEnd { offset: usize },
    MissingEnd,
    CodeAfterEnd { offset: usize },
    InvalidAlignment { offset: usize, align: u32 },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::UnknownOpcode { offset, opcode } => {
                write!(f, "unknown opcode 0x{opcode:02X} at offset {offset}")
            }
            ValidationError::VectorOpcode { offset } => {
                write!(f, "vector opcode prefix at offset {offset} is not supported")
            }
            ValidationError::UnsupportedBlockType { offset, tag } => {
                write!(f, "unsupported block type 0x{tag:02X} at offset {offset}")
            }
            ValidationError::TruncatedImmediate { offset, opcode } => {
                write!(
                    f,
                    "truncated immediate for opcode 0x{opcode:02X} at offset {offset}"
                )
            }
            ValidationError::InvalidLocal { offset, index } => {
                write!(f, "invalid local index {index} at offset {offset}")
            }
            ValidationError::BranchDepth { offset, depth } => {
                write!(f, "branch depth {depth} out of range at offset {offset}")
            }
            ValidationError::StackUnderflow { offset } => {
                write!(f, "operand stack underflow at offset {offset}")
            }
            ValidationError::UnbalancedStack { offset } => {
                write!(f, "operand stack not empty at end, offset {offset}")
            }
            ValidationError::ElseWithoutIf { offset } => {
                write!(f, "else without matching if at offset {offset}")
            }
            ValidationError::UnmatchedEnd { offset } => {
                write!(f, "end without open frame at offset {offset}")
            }
            ValidationError::MissingEnd => write!(f, "body missing final end"),
            ValidationError::CodeAfterEnd { offset } => {
                write!(f, "code continues after function end at offset {offset}")
            }
            ValidationError::InvalidAlignment { offset, align } => {
                write!(f, "invalid memory alignment {align} at offset {offset}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlTargets {
    pub else_offset: Option<usize>,
    pub end_offset: usize,
}

/// Control-matching table: opening opcode offset → its `else`/`end`.
#[derive(Debug, Clone, Default)]
pub struct ControlMap {
    targets: HashMap<usize, ControlTargets>,
}

impl ControlMap {
    pub fn targets(&self, opener: usize) -> Option<ControlTargets> {
        self.targets.get(&opener).copied()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
}

struct Frame {
    kind: FrameKind,
    opener: usize,
    entry_depth: usize,
    else_offset: Option<usize>,
    unreachable: bool,
}

pub fn validate_body(module: &Module) -> Result<ControlMap, ValidationError> {
    let code = &module.code;
    let local_limit = module.param_count + module.local_count;
    let mut map = ControlMap::default();

    let mut frames = vec![Frame {
        kind: FrameKind::Function,
        opener: 0,
        entry_depth: 0,
        else_offset: None,
        unreachable: false,
    }];
    let mut depth = 0usize;
    let mut offset = 0usize;
    let mut finished = false;

    while offset < code.len() {
        if finished {
            return Err(ValidationError::CodeAfterEnd { offset });
        }
        let start = offset;
        let opcode = code[offset];
        offset += 1;

        match opcode {
            op::BLOCK | op::LOOP => {
                read_block_type(code, &mut offset, start)?;
                frames.push(Frame {
                    kind: if opcode == op::BLOCK {
                        FrameKind::Block
                    } else {
                        FrameKind::Loop
                    },
                    opener: start,
                    entry_depth: depth,
                    else_offset: None,
                    unreachable: false,
                });
            }
            op::IF => {
                read_block_type(code, &mut offset, start)?;
                pop(&mut depth, 1, &frames, start)?;
                frames.push(Frame {
                    kind: FrameKind::If,
                    opener: start,
                    entry_depth: depth,
                    else_offset: None,
                    unreachable: false,
                });
            }
            op::ELSE => {
                let frame = frames.last_mut().ok_or(ValidationError::UnmatchedEnd {
                    offset: start,
                })?;
                if frame.kind != FrameKind::If || frame.else_offset.is_some() {
                    return Err(ValidationError::ElseWithoutIf { offset: start });
                }
                if !frame.unreachable && depth != frame.entry_depth {
                    return Err(ValidationError::UnbalancedStack { offset: start });
                }
                frame.else_offset = Some(start);
                frame.unreachable = false;
                depth = frame.entry_depth;
            }
            op::END => {
                let frame = frames.pop().ok_or(ValidationError::UnmatchedEnd {
                    offset: start,
                })?;
                if !frame.unreachable && depth != frame.entry_depth {
                    return Err(ValidationError::UnbalancedStack { offset: start });
                }
                depth = frame.entry_depth;
                match frame.kind {
                    FrameKind::Function => finished = true,
                    _ => {
                        map.targets.insert(
                            frame.opener,
                            ControlTargets {
                                else_offset: frame.else_offset,
                                end_offset: start,
                            },
                        );
                    }
                }
            }
            op::BR | op::BR_IF => {
                let target = read_u32_imm(code, &mut offset, start, opcode)?;
                if target as usize >= frames.len() {
                    return Err(ValidationError::BranchDepth {
                        offset: start,
                        depth: target,
                    });
                }
                if opcode == op::BR_IF {
                    pop(&mut depth, 1, &frames, start)?;
                } else if let Some(frame) = frames.last_mut() {
                    frame.unreachable = true;
                }
            }
            op::LOCAL_GET => {
                check_local(code, &mut offset, start, opcode, local_limit)?;
                depth += 1;
            }
            op::LOCAL_SET => {
                check_local(code, &mut offset, start, opcode, local_limit)?;
                pop(&mut depth, 1, &frames, start)?;
            }
            op::LOCAL_TEE => {
                check_local(code, &mut offset, start, opcode, local_limit)?;
                pop(&mut depth, 1, &frames, start)?;
                depth += 1;
            }
            op::I32_LOAD => {
                read_mem_arg(code, &mut offset, start, opcode)?;
                pop(&mut depth, 1, &frames, start)?;
                depth += 1;
            }
            op::I32_STORE => {
                read_mem_arg(code, &mut offset, start, opcode)?;
                pop(&mut depth, 2, &frames, start)?;
            }
            op::I32_CONST => {
                read_sleb128(code, &mut offset).map_err(|_| {
                    ValidationError::TruncatedImmediate {
                        offset: start,
                        opcode,
                    }
                })?;
                depth += 1;
            }
            op::I32_EQZ => {
                pop(&mut depth, 1, &frames, start)?;
                depth += 1;
            }
            op::I32_EQ | op::I32_LT_S | op::I32_LT_U | op::I32_ADD | op::I32_SUB | op::I32_MUL
            | op::I32_AND | op::I32_OR | op::I32_XOR | op::I32_SHL | op::I32_SHR_S
            | op::I32_SHR_U | op::I32_ROTL => {
                pop(&mut depth, 2, &frames, start)?;
                depth += 1;
            }
            op::SIMD_PREFIX => {
                return Err(ValidationError::VectorOpcode { offset: start });
            }
            other => {
                return Err(ValidationError::UnknownOpcode {
                    offset: start,
                    opcode: other,
                });
            }
        }
    }

    if !finished {
        return Err(ValidationError::MissingEnd);
    }
    Ok(map)
}

fn pop(
    depth: &mut usize,
    count: usize,
    frames: &[Frame],
    offset: usize,
) -> Result<(), ValidationError> {
    let frame = frames.last().ok_or(ValidationError::UnmatchedEnd { offset })?;
    if frame.unreachable {
        *depth = (*depth).saturating_sub(count).max(frame.entry_depth);
        return Ok(());
    }
    if *depth < frame.entry_depth + count {
        return Err(ValidationError::StackUnderflow { offset });
    }
    *depth -= count;
    Ok(())
}

fn read_block_type(code: &[u8], offset: &mut usize, start: usize) -> Result<(), ValidationError> {
    let tag = *code.get(*offset).ok_or(ValidationError::TruncatedImmediate {
        offset: start,
        opcode: code[start],
    })?;
    *offset += 1;
    if tag != BLOCKTYPE_EMPTY {
        return Err(ValidationError::UnsupportedBlockType { offset: start, tag });
    }
    Ok(())
}

fn read_u32_imm(
    code: &[u8],
    offset: &mut usize,
    start: usize,
    opcode: u8,
) -> Result<u32, ValidationError> {
    read_uleb128(code, offset).map_err(|_| ValidationError::TruncatedImmediate {
        offset: start,
        opcode,
    })
}

fn check_local(
    code: &[u8],
    offset: &mut usize,
    start: usize,
    opcode: u8,
    limit: u32,
) -> Result<(), ValidationError> {
    let index = read_u32_imm(code, offset, start, opcode)?;
    if index >= limit {
        return Err(ValidationError::InvalidLocal {
            offset: start,
            index,
        });
    }
    Ok(())
}

fn read_mem_arg(
    code: &[u8],
    offset: &mut usize,
    start: usize,
    opcode: u8,
) -> Result<(), ValidationError> {
    let align = read_u32_imm(code, offset, start, opcode)?;
    if align > 2 {
        return Err(ValidationError::InvalidAlignment {
            offset: start,
            align,
        });
    }
    read_u32_imm(code, offset, start, opcode)?;
    Ok(())
}
