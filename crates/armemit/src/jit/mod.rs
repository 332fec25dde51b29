
use armemit_codegen::code_buffer::CodeBuffer;
use armemit_codegen::disasm;
use armemit_codegen::{Code, EncodeError, Emitter, Isa, Label, Target};
use tracing::{debug, warn};

use crate::config::JitConfig;

/// Finished code copied into executable memory.
///
/// The buffer is finalized before a `JitCode` is handed out, so the words
/// are visible to instruction fetch and may be called from any thread.
pub struct JitCode {
    buffer: CodeBuffer,
    code: Code,
}

/// Turns finished emitter sessions into executable code.
///
/// # Examples
///
/// ```ignore
/// let jit = JitCompiler::new(JitConfig::default());
/// let code = jit.compile_with(|e: &mut Emitter<Arm64>| {
///     e.mov_imm(Reg::x(0), 42)?;
///     e.ret();
///     Ok(())
/// })?;
/// let f: extern "C" fn() -> u64 = unsafe { std::mem::transmute(code.entry()) };
/// ```
pub struct JitCompiler {
    config: JitConfig,
}

impl JitCompiler {
    pub fn new(config: JitConfig) -> Self {
        JitCompiler { config }
    }

    /// Compiler configured from `ARMEMIT_*` environment variables.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Ok(JitCompiler::new(JitConfig::from_env()?))
    }

    /// Enable or disable logging the listing of each compiled session.
    pub fn dump(mut self, enabled: bool) -> Self {
        self.config.dump_code = enabled;
        self
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Run `build` against a fresh emitter, finish the session and compile
    /// the result.
    pub fn compile_with<T: Target>(
        &self,
        build: impl FnOnce(&mut Emitter<T>) -> Result<(), EncodeError>,
    ) -> Result<JitCode, anyhow::Error> {
        let mut emitter = Emitter::<T>::new();
        build(&mut emitter)?;
        self.compile(emitter.finish()?)
    }

    /// Copy `code` into a fresh code buffer, make it executable and flush
    /// the instruction cache.
    pub fn compile(&self, code: Code) -> Result<JitCode, anyhow::Error> {
        anyhow::ensure!(!code.words.is_empty(), "no instructions to compile");
        if Isa::host() != Some(code.isa) {
            warn!(isa = %code.isa, "finalizing code the host cannot execute");
        }

        let len = code.len_bytes();
        let mut buffer =
            CodeBuffer::with_reserve(self.config.code_reserve, len.max(self.config.initial_commit))?;
        buffer.emit_words(&code.words)?;
        buffer.finalize()?;

        debug!(
            isa = %code.isa,
            bytes = len,
            labels = code.labels.len(),
            entry = ?buffer.entry(),
            "compiled session"
        );
        if self.config.dump_code {
            debug!("listing:\n{}", disasm::render_listing(&code));
        }
        Ok(JitCode { buffer, code })
    }
}

impl Default for JitCompiler {
    fn default() -> Self {
        JitCompiler::new(JitConfig::default())
    }
}

impl JitCode {
    pub fn isa(&self) -> Isa {
        self.code.isa
    }

    /// Start of the executable code.
    pub fn entry(&self) -> *const u8 {
        self.buffer.entry()
    }

    pub fn len_bytes(&self) -> usize {
        self.code.len_bytes()
    }

    /// Executable address of a label bound during the session.
    pub fn label_address(&self, label: Label) -> Option<*const u8> {
        let offset = self.code.label_offset(label)?;
        Some(self.buffer.entry().wrapping_add(offset))
    }

    /// The words as emitted, with label and marker information.
    pub fn code(&self) -> &Code {
        &self.code
    }

    pub fn listing(&self) -> String {
        disasm::render_listing(&self.code)
    }
}
