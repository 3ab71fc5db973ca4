use crate::leb128::{LebError, read_uleb128};
use crate::opcodes::{
    EXPORT_KIND_FUNC, FUNC_TYPE, IMPORT_KIND_MEMORY, LIMITS_MIN_MAX, LIMITS_MIN_MAX_SHARED, MAGIC,
    VERSION, section, valtype,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedEof,
    InvalidMagic([u8; 4]),
    UnsupportedVersion([u8; 4]),
    SectionOrder { id: u8, previous: u8 },
    SectionSize { id: u8 },
    UnknownSection(u8),
    MissingSection(u8),
    InvalidFuncType,
    UnsupportedValueType(u8),
    UnsupportedImport,
    InvalidLimits(u8),
    InvalidExport,
    CountMismatch { what: &'static str, got: u32 },
    InvalidLocalDecl,
    InvalidUtf8,
    Leb(LebError),
    TrailingBytes,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of module"),
            DecodeError::InvalidMagic(found) => write!(f, "invalid magic: {found:?}"),
            DecodeError::UnsupportedVersion(found) => {
                write!(f, "unsupported version: {found:?}")
            }
            DecodeError::SectionOrder { id, previous } => {
                write!(f, "section {id} after section {previous}")
            }
            DecodeError::SectionSize { id } => {
                write!(f, "section {id} size disagrees with content")
            }
            DecodeError::UnknownSection(id) => write!(f, "unknown section id {id}"),
            DecodeError::MissingSection(id) => write!(f, "missing section id {id}"),
            DecodeError::InvalidFuncType => write!(f, "malformed function type"),
            DecodeError::UnsupportedValueType(tag) => {
                write!(f, "unsupported value type 0x{tag:02X}")
            }
            DecodeError::UnsupportedImport => {
                write!(f, "module must import exactly env.memory")
            }
            DecodeError::InvalidLimits(flags) => write!(f, "invalid limits flags 0x{flags:02X}"),
            DecodeError::InvalidExport => write!(f, "malformed export entry"),
            DecodeError::CountMismatch { what, got } => {
                write!(f, "expected exactly one {what}, got {got}")
            }
            DecodeError::InvalidLocalDecl => write!(f, "malformed local declarations"),
            DecodeError::InvalidUtf8 => write!(f, "invalid utf-8 name"),
            DecodeError::Leb(err) => write!(f, "invalid integer encoding: {err}"),
            DecodeError::TrailingBytes => write!(f, "trailing bytes after final section"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<LebError> for DecodeError {
    fn from(value: LebError) -> Self {
        match value {
            LebError::UnexpectedEof => DecodeError::UnexpectedEof,
            other => DecodeError::Leb(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    pub min_pages: u32,
    pub max_pages: u32,
    pub shared: bool,
}

/// Decoded module: the fixed BitBLT shape plus the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub param_count: u32,
    pub memory: MemoryLimits,
    pub export_name: String,
    pub local_count: u32,
    pub code: Vec<u8>,
}

pub fn decode_module(bytes: &[u8]) -> Result<Module, DecodeError> {
    let mut offset = 0usize;

    let magic = read_array::<4>(bytes, &mut offset)?;
    if magic != MAGIC {
        return Err(DecodeError::InvalidMagic(magic));
    }
    let version = read_array::<4>(bytes, &mut offset)?;
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let mut previous_id = 0u8;
    let mut param_count = None;
    let mut memory = None;
    let mut func_declared = false;
    let mut export_name = None;
    let mut body = None;

    while offset < bytes.len() {
        let id = bytes[offset];
        offset += 1;
        if id <= previous_id {
            return Err(DecodeError::SectionOrder {
                id,
                previous: previous_id,
            });
        }
        previous_id = id;

        let len = read_uleb128(bytes, &mut offset)? as usize;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or(DecodeError::UnexpectedEof)?;
        let payload = &bytes[offset..end];

        match id {
            section::TYPE => param_count = Some(read_type_section(payload)?),
            section::IMPORT => memory = Some(read_import_section(payload)?),
            section::FUNCTION => {
                read_function_section(payload)?;
                func_declared = true;
            }
            section::MEMORY => {
                // Memory is imported; a defined memory is not part of the
                // BitBLT module shape.
                return Err(DecodeError::UnsupportedImport);
            }
            section::EXPORT => export_name = Some(read_export_section(payload)?),
            section::CODE => body = Some(read_code_section(payload)?),
            other => return Err(DecodeError::UnknownSection(other)),
        }
        offset = end;
    }

    let param_count = param_count.ok_or(DecodeError::MissingSection(section::TYPE))?;
    let memory = memory.ok_or(DecodeError::MissingSection(section::IMPORT))?;
    if !func_declared {
        return Err(DecodeError::MissingSection(section::FUNCTION));
    }
    let export_name = export_name.ok_or(DecodeError::MissingSection(section::EXPORT))?;
    let (local_count, code) = body.ok_or(DecodeError::MissingSection(section::CODE))?;

    Ok(Module {
        param_count,
        memory,
        export_name,
        local_count,
        code,
    })
}

fn read_type_section(payload: &[u8]) -> Result<u32, DecodeError> {
    let mut offset = 0usize;
    let count = read_uleb128(payload, &mut offset)?;
    if count != 1 {
        return Err(DecodeError::CountMismatch {
            what: "type",
            got: count,
        });
    }
    if read_byte(payload, &mut offset)? != FUNC_TYPE {
        return Err(DecodeError::InvalidFuncType);
    }
    let params = read_uleb128(payload, &mut offset)?;
    for _ in 0..params {
        let tag = read_byte(payload, &mut offset)?;
        if tag != valtype::I32 {
            return Err(DecodeError::UnsupportedValueType(tag));
        }
    }
    let results = read_uleb128(payload, &mut offset)?;
    if results != 0 {
        return Err(DecodeError::InvalidFuncType);
    }
    expect_consumed(payload, offset, section::TYPE)?;
    Ok(params)
}

fn read_import_section(payload: &[u8]) -> Result<MemoryLimits, DecodeError> {
    let mut offset = 0usize;
    let count = read_uleb128(payload, &mut offset)?;
    if count != 1 {
        return Err(DecodeError::CountMismatch {
            what: "import",
            got: count,
        });
    }
    let module = read_name(payload, &mut offset)?;
    let name = read_name(payload, &mut offset)?;
    if module != crate::module::IMPORT_MODULE || name != crate::module::IMPORT_MEMORY {
        return Err(DecodeError::UnsupportedImport);
    }
    if read_byte(payload, &mut offset)? != IMPORT_KIND_MEMORY {
        return Err(DecodeError::UnsupportedImport);
    }
    let flags = read_byte(payload, &mut offset)?;
    let shared = match flags {
        LIMITS_MIN_MAX => false,
        LIMITS_MIN_MAX_SHARED => true,
        other => return Err(DecodeError::InvalidLimits(other)),
    };
    let min_pages = read_uleb128(payload, &mut offset)?;
    let max_pages = read_uleb128(payload, &mut offset)?;
    expect_consumed(payload, offset, section::IMPORT)?;
    Ok(MemoryLimits {
        min_pages,
        max_pages,
        shared,
    })
}

fn read_function_section(payload: &[u8]) -> Result<(), DecodeError> {
    let mut offset = 0usize;
    let count = read_uleb128(payload, &mut offset)?;
    if count != 1 {
        return Err(DecodeError::CountMismatch {
            what: "function",
            got: count,
        });
    }
    let type_index = read_uleb128(payload, &mut offset)?;
    if type_index != 0 {
        return Err(DecodeError::InvalidFuncType);
    }
    expect_consumed(payload, offset, section::FUNCTION)
}

fn read_export_section(payload: &[u8]) -> Result<String, DecodeError> {
    let mut offset = 0usize;
    let count = read_uleb128(payload, &mut offset)?;
    if count != 1 {
        return Err(DecodeError::CountMismatch {
            what: "export",
            got: count,
        });
    }
    let name = read_name(payload, &mut offset)?;
    if read_byte(payload, &mut offset)? != EXPORT_KIND_FUNC {
        return Err(DecodeError::InvalidExport);
    }
    let index = read_uleb128(payload, &mut offset)?;
    if index != 0 {
        return Err(DecodeError::InvalidExport);
    }
    expect_consumed(payload, offset, section::EXPORT)?;
    Ok(name)
}

fn read_code_section(payload: &[u8]) -> Result<(u32, Vec<u8>), DecodeError> {
    let mut offset = 0usize;
    let count = read_uleb128(payload, &mut offset)?;
    if count != 1 {
        return Err(DecodeError::CountMismatch {
            what: "body",
            got: count,
        });
    }
    let body_len = read_uleb128(payload, &mut offset)? as usize;
    let body_end = offset
        .checked_add(body_len)
        .filter(|end| *end <= payload.len())
        .ok_or(DecodeError::UnexpectedEof)?;
    let body = &payload[offset..body_end];

    // Local declarations: runs of (count, valtype).
    let mut body_offset = 0usize;
    let decl_runs = read_uleb128(body, &mut body_offset)?;
    let mut local_count = 0u32;
    for _ in 0..decl_runs {
        let run = read_uleb128(body, &mut body_offset)?;
        let tag = read_byte(body, &mut body_offset)?;
        if tag != valtype::I32 {
            return Err(DecodeError::UnsupportedValueType(tag));
        }
        local_count = local_count
            .checked_add(run)
            .ok_or(DecodeError::InvalidLocalDecl)?;
    }
    let code = body[body_offset..].to_vec();

    if body_end != payload.len() {
        return Err(DecodeError::SectionSize { id: section::CODE });
    }
    Ok((local_count, code))
}

fn read_byte(bytes: &[u8], offset: &mut usize) -> Result<u8, DecodeError> {
    let value = *bytes.get(*offset).ok_or(DecodeError::UnexpectedEof)?;
    *offset += 1;
    Ok(value)
}

fn read_array<const N: usize>(bytes: &[u8], offset: &mut usize) -> Result<[u8; N], DecodeError> {
    let end = offset
        .checked_add(N)
        .filter(|end| *end <= bytes.len())
        .ok_or(DecodeError::UnexpectedEof)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[*offset..end]);
    *offset = end;
    Ok(out)
}

fn read_name(bytes: &[u8], offset: &mut usize) -> Result<String, DecodeError> {
    let len = read_uleb128(bytes, offset)? as usize;
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or(DecodeError::UnexpectedEof)?;
    let name = std::str::from_utf8(&bytes[*offset..end]).map_err(|_| DecodeError::InvalidUtf8)?;
    *offset = end;
    Ok(name.to_string())
}

fn expect_consumed(payload: &[u8], offset: usize, id: u8) -> Result<(), DecodeError> {
    if offset == payload.len() {
        Ok(())
    } else {
        Err(DecodeError::SectionSize { id })
    }
}
