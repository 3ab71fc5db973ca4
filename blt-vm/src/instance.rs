//! An instantiated module: validated body, control-matching table, and a
//! paged linear memory. Execution is a stack interpreter over the decoded
//! expression, branching through the table the validator recorded.

use crate::decode::{DecodeError, Module, decode_module};
use crate::leb128::{read_sleb128, read_uleb128};
use crate::opcodes::{PAGE_SIZE, op};
use crate::validate::{ControlMap, ValidationError, validate_body};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstantiateError {
    Decode(DecodeError),
    Validation(ValidationError),
    BadLimits { min_pages: u32, max_pages: u32 },
}

impl std::fmt::Display for InstantiateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstantiateError::Decode(err) => write!(f, "decode: {err}"),
            InstantiateError::Validation(err) => write!(f, "validation: {err}"),
            InstantiateError::BadLimits {
                min_pages,
                max_pages,
            } => write!(f, "memory limits min={min_pages} max={max_pages}"),
        }
    }
}

impl std::error::Error for InstantiateError {}

impl From<DecodeError> for InstantiateError {
    fn from(value: DecodeError) -> Self {
        InstantiateError::Decode(value)
    }
}

impl From<ValidationError> for InstantiateError {
    fn from(value: ValidationError) -> Self {
        InstantiateError::Validation(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrapError {
    OutOfBoundsMemory { address: u32 },
    StackUnderflow { offset: usize },
    InvalidLocal { index: u32 },
    InvalidOpcode { offset: usize, opcode: u8 },
    MalformedImmediate { offset: usize },
    MissingControlTarget { offset: usize },
    CodeBounds,
    GrowBeyondMax { pages: usize, max_pages: u32 },
}

impl std::fmt::Display for TrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrapError::OutOfBoundsMemory { address } => {
                write!(f, "out-of-bounds memory access at {address:#010x}")
            }
            TrapError::StackUnderflow { offset } => {
                write!(f, "operand stack underflow at offset {offset}")
            }
            TrapError::InvalidLocal { index } => write!(f, "invalid local index {index}"),
            TrapError::InvalidOpcode { offset, opcode } => {
                write!(f, "invalid opcode 0x{opcode:02X} at offset {offset}")
            }
            TrapError::MalformedImmediate { offset } => {
                write!(f, "malformed immediate at offset {offset}")
            }
            TrapError::MissingControlTarget { offset } => {
                write!(f, "no control target recorded for offset {offset}")
            }
            TrapError::CodeBounds => write!(f, "execution ran past the end of the body"),
            TrapError::GrowBeyondMax { pages, max_pages } => {
                write!(f, "cannot grow memory to {pages} pages, maximum {max_pages}")
            }
        }
    }
}

impl std::error::Error for TrapError {}

enum FrameKind {
    Block,
    Loop,
    If,
}

struct Frame {
    kind: FrameKind,
    entry_depth: usize,
    // Loop: offset of the first instruction of the body; Block/If: offset
    // just past the matching end.
    branch_target: usize,
    end_offset: usize,
}

pub struct ModuleInstance {
    module: Module,
    control: ControlMap,
    memory: Vec<u8>,
}

impl ModuleInstance {
    /// Decodes, validates, and sets up the imported memory at its minimum
    /// size. Decode failures are generation defects; validation failures
    /// mean the emitter produced a malformed body.
    pub fn instantiate(bytes: &[u8]) -> Result<Self, InstantiateError> {
        let module = decode_module(bytes)?;
        if module.memory.min_pages == 0 || module.memory.min_pages > module.memory.max_pages {
            return Err(InstantiateError::BadLimits {
                min_pages: module.memory.min_pages,
                max_pages: module.memory.max_pages,
            });
        }
        let control = validate_body(&module)?;
        let memory = vec![0u8; module.memory.min_pages as usize * PAGE_SIZE];
        Ok(Self {
            module,
            control,
            memory,
        })
    }

    pub fn export_name(&self) -> &str {
        &self.module.export_name
    }

    pub fn shared_memory(&self) -> bool {
        self.module.memory.shared
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn max_pages(&self) -> u32 {
        self.module.memory.max_pages
    }

    /// Grows the memory to hold at least `bytes`, page-granular, within the
    /// import's declared maximum.
    pub fn ensure_capacity(&mut self, bytes: usize) -> Result<(), TrapError> {
        if bytes <= self.memory.len() {
            return Ok(());
        }
        let pages = bytes.div_ceil(PAGE_SIZE);
        if pages > self.module.memory.max_pages as usize {
            return Err(TrapError::GrowBeyondMax {
                pages,
                max_pages: self.module.memory.max_pages,
            });
        }
        self.memory.resize(pages * PAGE_SIZE, 0);
        Ok(())
    }

    /// Writes `words` into linear memory as little-endian 32-bit words at
    /// `byte_offset`.
    pub fn write_words(&mut self, byte_offset: usize, words: &[u32]) -> Result<(), TrapError> {
        let end = byte_offset
            .checked_add(words.len() * 4)
            .filter(|end| *end <= self.memory.len())
            .ok_or(TrapError::OutOfBoundsMemory {
                address: byte_offset as u32,
            })?;
        for (chunk, word) in self.memory[byte_offset..end].chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    /// Reads `words.len()` little-endian words from `byte_offset`.
    pub fn read_words(&self, byte_offset: usize, words: &mut [u32]) -> Result<(), TrapError> {
        let end = byte_offset
            .checked_add(words.len() * 4)
            .filter(|end| *end <= self.memory.len())
            .ok_or(TrapError::OutOfBoundsMemory {
                address: byte_offset as u32,
            })?;
        for (chunk, word) in self.memory[byte_offset..end].chunks_exact(4).zip(words) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    /// Runs the exported function with the given arguments. The operand
    /// stack and locals are call-scoped; only linear memory persists.
    pub fn invoke(&mut self, args: &[i32]) -> Result<(), TrapError> {
        let code = std::mem::take(&mut self.module.code);
        let result = self.run(&code, args);
        self.module.code = code;
        result
    }

    fn run(&mut self, code: &[u8], args: &[i32]) -> Result<(), TrapError> {
        let local_total = (self.module.param_count + self.module.local_count) as usize;
        let mut locals = vec![0i32; local_total];
        locals[..args.len().min(local_total)]
            .copy_from_slice(&args[..args.len().min(local_total)]);

        let mut stack: Vec<i32> = Vec::with_capacity(16);
        let mut frames: Vec<Frame> = Vec::with_capacity(8);
        let mut pc = 0usize;

        loop {
            if pc >= code.len() {
                return Err(TrapError::CodeBounds);
            }
            let at = pc;
            let opcode = code[pc];
            pc += 1;

            match opcode {
                op::BLOCK | op::LOOP | op::IF => {
                    pc += 1; // block type
                    let targets = self
                        .control
                        .targets(at)
                        .ok_or(TrapError::MissingControlTarget { offset: at })?;
                    match opcode {
                        op::BLOCK => frames.push(Frame {
                            kind: FrameKind::Block,
                            entry_depth: stack.len(),
                            branch_target: targets.end_offset + 1,
                            end_offset: targets.end_offset,
                        }),
                        op::LOOP => frames.push(Frame {
                            kind: FrameKind::Loop,
                            entry_depth: stack.len(),
                            branch_target: pc,
                            end_offset: targets.end_offset,
                        }),
                        _ => {
                            let condition = pop_value(&mut stack, at)?;
                            frames.push(Frame {
                                kind: FrameKind::If,
                                entry_depth: stack.len(),
                                branch_target: targets.end_offset + 1,
                                end_offset: targets.end_offset,
                            });
                            if condition == 0 {
                                pc = match targets.else_offset {
                                    Some(else_offset) => else_offset + 1,
                                    None => targets.end_offset,
                                };
                            }
                        }
                    }
                }
                op::ELSE => {
                    // Reached by falling out of the then-branch: skip to end.
                    let frame = frames.last().ok_or(TrapError::CodeBounds)?;
                    pc = frame.end_offset;
                }
                op::END => {
                    match frames.pop() {
                        Some(_) => {}
                        None => return Ok(()), // function end
                    }
                }
                op::BR => {
                    let depth = read_imm_u32(code, &mut pc, at)?;
                    branch(&mut frames, &mut stack, &mut pc, depth)?;
                    if pc == usize::MAX {
                        return Ok(());
                    }
                }
                op::BR_IF => {
                    let depth = read_imm_u32(code, &mut pc, at)?;
                    let condition = pop_value(&mut stack, at)?;
                    if condition != 0 {
                        branch(&mut frames, &mut stack, &mut pc, depth)?;
                        if pc == usize::MAX {
                            return Ok(());
                        }
                    }
                }
                op::LOCAL_GET => {
                    let index = read_imm_u32(code, &mut pc, at)?;
                    let value = *locals
                        .get(index as usize)
                        .ok_or(TrapError::InvalidLocal { index })?;
                    stack.push(value);
                }
                op::LOCAL_SET => {
                    let index = read_imm_u32(code, &mut pc, at)?;
                    let value = pop_value(&mut stack, at)?;
                    let slot = locals
                        .get_mut(index as usize)
                        .ok_or(TrapError::InvalidLocal { index })?;
                    *slot = value;
                }
                op::LOCAL_TEE => {
                    let index = read_imm_u32(code, &mut pc, at)?;
                    let value = *stack.last().ok_or(TrapError::StackUnderflow { offset: at })?;
                    let slot = locals
                        .get_mut(index as usize)
                        .ok_or(TrapError::InvalidLocal { index })?;
                    *slot = value;
                }
                op::I32_LOAD => {
                    let (_align, mem_offset) = read_mem_arg(code, &mut pc, at)?;
                    let address = pop_value(&mut stack, at)? as u32;
                    let value = self.load_word(address.wrapping_add(mem_offset))?;
                    stack.push(value as i32);
                }
                op::I32_STORE => {
                    let (_align, mem_offset) = read_mem_arg(code, &mut pc, at)?;
                    let value = pop_value(&mut stack, at)?;
                    let address = pop_value(&mut stack, at)? as u32;
                    self.store_word(address.wrapping_add(mem_offset), value as u32)?;
                }
                op::I32_CONST => {
                    let value = read_sleb128(code, &mut pc)
                        .map_err(|_| TrapError::MalformedImmediate { offset: at })?;
                    stack.push(value);
                }
                op::I32_EQZ => {
                    let value = pop_value(&mut stack, at)?;
                    stack.push(i32::from(value == 0));
                }
                op::I32_EQ => {
                    let rhs = pop_value(&mut stack, at)?;
                    let lhs = pop_value(&mut stack, at)?;
                    stack.push(i32::from(lhs == rhs));
                }
                op::I32_LT_S => {
                    let rhs = pop_value(&mut stack, at)?;
                    let lhs = pop_value(&mut stack, at)?;
                    stack.push(i32::from(lhs < rhs));
                }
                op::I32_LT_U => {
                    let rhs = pop_value(&mut stack, at)? as u32;
                    let lhs = pop_value(&mut stack, at)? as u32;
                    stack.push(i32::from(lhs < rhs));
                }
                op::I32_ADD => binop(&mut stack, at, |l, r| l.wrapping_add(r))?,
                op::I32_SUB => binop(&mut stack, at, |l, r| l.wrapping_sub(r))?,
                op::I32_MUL => binop(&mut stack, at, |l, r| l.wrapping_mul(r))?,
                op::I32_AND => binop(&mut stack, at, |l, r| l & r)?,
                op::I32_OR => binop(&mut stack, at, |l, r| l | r)?,
                op::I32_XOR => binop(&mut stack, at, |l, r| l ^ r)?,
                op::I32_SHL => binop(&mut stack, at, |l, r| l.wrapping_shl(r as u32))?,
                op::I32_SHR_S => binop(&mut stack, at, |l, r| l.wrapping_shr(r as u32))?,
                op::I32_SHR_U => {
                    binop(&mut stack, at, |l, r| {
                        ((l as u32).wrapping_shr(r as u32)) as i32
                    })?;
                }
                op::I32_ROTL => {
                    binop(&mut stack, at, |l, r| {
                        (l as u32).rotate_left(r as u32) as i32
                    })?;
                }
                other => {
                    return Err(TrapError::InvalidOpcode {
                        offset: at,
                        opcode: other,
                    });
                }
            }
        }
    }

    fn load_word(&self, address: u32) -> Result<u32, TrapError> {
        let start = address as usize;
        let end = start
            .checked_add(4)
            .filter(|end| *end <= self.memory.len())
            .ok_or(TrapError::OutOfBoundsMemory { address })?;
        let bytes = &self.memory[start..end];
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn store_word(&mut self, address: u32, value: u32) -> Result<(), TrapError> {
        let start = address as usize;
        let end = start
            .checked_add(4)
            .filter(|end| *end <= self.memory.len())
            .ok_or(TrapError::OutOfBoundsMemory { address })?;
        self.memory[start..end].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

fn branch(
    frames: &mut Vec<Frame>,
    stack: &mut Vec<i32>,
    pc: &mut usize,
    depth: u32,
) -> Result<(), TrapError> {
    let depth = depth as usize;
    if depth >= frames.len() {
        // Branch to the function frame: return from the call.
        frames.clear();
        stack.clear();
        *pc = usize::MAX;
        return Ok(());
    }
    let index = frames.len() - 1 - depth;
    let target = &frames[index];
    stack.truncate(target.entry_depth);
    match target.kind {
        FrameKind::Loop => {
            *pc = target.branch_target;
            frames.truncate(index + 1);
        }
        FrameKind::Block | FrameKind::If => {
            *pc = target.branch_target;
            frames.truncate(index);
        }
    }
    Ok(())
}

fn pop_value(stack: &mut Vec<i32>, offset: usize) -> Result<i32, TrapError> {
    stack.pop().ok_or(TrapError::StackUnderflow { offset })
}

fn binop(
    stack: &mut Vec<i32>,
    offset: usize,
    apply: impl Fn(i32, i32) -> i32,
) -> Result<(), TrapError> {
    let rhs = pop_value(stack, offset)?;
    let lhs = pop_value(stack, offset)?;
    stack.push(apply(lhs, rhs));
    Ok(())
}

fn read_imm_u32(code: &[u8], pc: &mut usize, at: usize) -> Result<u32, TrapError> {
    read_uleb128(code, pc).map_err(|_| TrapError::MalformedImmediate { offset: at })
}

fn read_mem_arg(code: &[u8], pc: &mut usize, at: usize) -> Result<(u32, u32), TrapError> {
    let align = read_imm_u32(code, pc, at)?;
    let offset = read_imm_u32(code, pc, at)?;
    Ok((align, offset))
}
