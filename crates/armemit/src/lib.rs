pub mod config;
pub mod cpu;
pub mod jit;

pub use armemit_codegen as codegen;
pub use config::JitConfig;
pub use cpu::CpuFeatures;
pub use jit::{JitCode, JitCompiler};
