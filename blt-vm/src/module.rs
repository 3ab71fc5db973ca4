//! Assembles a complete module around one generated BitBLT body: magic and
//! version, then the type, import, function, export, and code sections in
//! that order. The module imports `env.memory` and exports `bitblt`.

use crate::body::PARAM_COUNT;
use crate::leb128::{write_section, write_uleb128};
use crate::opcodes::{
    EXPORT_KIND_FUNC, FUNC_TYPE, IMPORT_KIND_MEMORY, LIMITS_MIN_MAX, LIMITS_MIN_MAX_SHARED, MAGIC,
    VERSION, section, valtype,
};

pub const IMPORT_MODULE: &str = "env";
pub const IMPORT_MEMORY: &str = "memory";
pub const EXPORT_ENTRY: &str = "bitblt";

pub const MEMORY_MIN_PAGES: u32 = 1;
pub const MEMORY_MAX_PAGES: u32 = 16;

/// Emits the full module for a function body produced by
/// [`crate::body::scalar_body`] or [`crate::body::aligned_body`]. The shared
/// variant differs only in the memory-import limits flag.
pub fn encode_module(body: &[u8], shared: bool) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION);

    // type: one signature, eleven i32 parameters, no results.
    let mut types = Vec::new();
    write_uleb128(&mut types, 1);
    types.push(FUNC_TYPE);
    write_uleb128(&mut types, PARAM_COUNT);
    for _ in 0..PARAM_COUNT {
        types.push(valtype::I32);
    }
    write_uleb128(&mut types, 0);
    write_section(&mut out, section::TYPE, &types);

    // import: env.memory with {min=1, max=16} pages.
    let mut imports = Vec::new();
    write_uleb128(&mut imports, 1);
    write_name(&mut imports, IMPORT_MODULE);
    write_name(&mut imports, IMPORT_MEMORY);
    imports.push(IMPORT_KIND_MEMORY);
    imports.push(if shared {
        LIMITS_MIN_MAX_SHARED
    } else {
        LIMITS_MIN_MAX
    });
    write_uleb128(&mut imports, MEMORY_MIN_PAGES);
    write_uleb128(&mut imports, MEMORY_MAX_PAGES);
    write_section(&mut out, section::IMPORT, &imports);

    // function: one function of type 0.
    let mut functions = Vec::new();
    write_uleb128(&mut functions, 1);
    write_uleb128(&mut functions, 0);
    write_section(&mut out, section::FUNCTION, &functions);

    // export: "bitblt" -> func 0.
    let mut exports = Vec::new();
    write_uleb128(&mut exports, 1);
    write_name(&mut exports, EXPORT_ENTRY);
    exports.push(EXPORT_KIND_FUNC);
    write_uleb128(&mut exports, 0);
    write_section(&mut out, section::EXPORT, &exports);

    // code: the single body.
    let mut code = Vec::new();
    write_uleb128(&mut code, 1);
    write_uleb128(&mut code, body.len() as u32);
    code.extend_from_slice(body);
    write_section(&mut out, section::CODE, &code);

    out
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    write_uleb128(out, name.len() as u32);
    out.extend_from_slice(name.as_bytes());
}
