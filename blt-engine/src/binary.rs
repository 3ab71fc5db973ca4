//! Binary back-end: emits a complete executable module in the portable
//! bytecode container, instantiates it on the module runtime, and runs
//! calls by staging both buffers through the module's linear memory. The
//! aligned variant imports shared memory and copies whole words per row.

use std::sync::Arc;

use blt_vm::{InstantiateError, ModuleInstance, TrapError, aligned_body, encode_module, scalar_body};
use tracing::debug;

use crate::analyzer::analyze;
use crate::backend::{Artifact, ArtifactCache, Backend, BackendStats, GeneratedCode};
use crate::error::{EngineError, GenerationError};
use crate::params::{BlitOp, CompileParams};

pub struct BinaryBackend {
    aligned: bool,
    cache: ArtifactCache,
}

impl std::fmt::Debug for BinaryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryBackend")
            .field("aligned", &self.aligned)
            .finish()
    }
}

impl Default for BinaryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryBackend {
    pub fn new() -> Self {
        Self {
            aligned: false,
            cache: ArtifactCache::new(),
        }
    }

    /// The aligned-binary variant: shared memory import and the whole-word
    /// loop. Compilation requires a word-aligned shape.
    pub fn aligned() -> Self {
        Self {
            aligned: true,
            cache: ArtifactCache::new(),
        }
    }

    fn emit(&self, params: &CompileParams) -> Result<Vec<u8>, EngineError> {
        let word_aligned = analyze(params).word_aligned;
        if self.aligned && !word_aligned {
            return Err(EngineError::Unsupported(
                "aligned-binary requires a word-aligned operation",
            ));
        }
        let use_aligned_loop = self.aligned || (params.flags.align_opt && word_aligned);
        let body = if use_aligned_loop {
            aligned_body()
        } else {
            scalar_body()
        };
        Ok(encode_module(&body, self.aligned))
    }
}

impl Backend for BinaryBackend {
    fn name(&self) -> &'static str {
        if self.aligned { "aligned-binary" } else { "binary" }
    }

    fn generate(&self, params: &CompileParams) -> Result<GeneratedCode, EngineError> {
        Ok(GeneratedCode::Module(self.emit(params)?))
    }

    fn compile(&self, params: &CompileParams) -> Result<Arc<Artifact>, EngineError> {
        let key = self.fingerprint(params);
        let debug_module = params.flags.debug;
        self.cache.get_or_compile(&key, || {
            let bytes = self.emit(params)?;
            if debug_module {
                debug!(target: "blt::binary", %key, module_bytes = bytes.len(), "emitted module");
            }
            let instance = ModuleInstance::instantiate(&bytes).map_err(|err| match err {
                InstantiateError::Decode(_) | InstantiateError::Validation(_) => {
                    EngineError::Generation(GenerationError::Module(err))
                }
                InstantiateError::BadLimits { .. } => EngineError::Instantiation(err),
            })?;
            Ok(Artifact::Module(std::sync::Mutex::new(instance)))
        })
    }

    fn execute(
        &self,
        artifact: &Artifact,
        src: &[u32],
        dst: &mut [u32],
        op: &BlitOp,
    ) -> Result<(), EngineError> {
        let Artifact::Module(instance) = artifact else {
            return Err(EngineError::Unsupported(
                "binary back-end received a non-module artifact",
            ));
        };
        let mut instance = instance.lock().expect("module instance poisoned");

        // Source words at offset 0, destination words right after; the
        // export receives byte addresses for both.
        let src_bytes = src.len() * 4;
        let dst_bytes = dst.len() * 4;
        let required = src_bytes + dst_bytes;
        instance.ensure_capacity(required).map_err(|err| match err {
            TrapError::GrowBeyondMax { max_pages, .. } => EngineError::MemoryCapacity {
                required_bytes: required,
                max_bytes: max_pages as usize * blt_vm::opcodes::PAGE_SIZE,
            },
            other => EngineError::Trap(other),
        })?;
        instance.write_words(0, src)?;
        instance.write_words(src_bytes, dst)?;

        let args: [i32; 11] = [
            0,
            op.src_w as i32,
            op.src_h as i32,
            op.src_x as i32,
            op.src_y as i32,
            src_bytes as i32,
            op.dst_w as i32,
            op.dst_x as i32,
            op.dst_y as i32,
            op.width as i32,
            op.height as i32,
        ];
        instance.invoke(&args)?;

        instance.read_words(src_bytes, dst)?;
        Ok(())
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }

    fn stats(&self) -> BackendStats {
        self.cache.stats()
    }
}

