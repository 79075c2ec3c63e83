//! Gameplay Script JIT Library
//!
//! Compiles a restricted subset of Rust (zero-argument functions over
//! fixed-width integers) straight to x86-64 machine code, loads it into
//! executable memory and calls it, so gameplay scripts can be hot-reloaded
//! without restarting the game.

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

pub mod analyzer;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod ir;
pub mod runtime;

// Re-export commonly used types
pub use analyzer::{CheckedModule, TypeChecker};
pub use codegen::{CodeGenerator, CompiledUnit};
pub use compiler::{compile, load, run_source, CompileOptions, Compiler, HotReloader, ScriptSource};
pub use error::{CodegenError, JitError, JitResult, MemoryMapError, ScriptError, TypeError};
pub use ir::{IntType, MemoryResolver, Module, ModuleResolver, ResolvedModule};
pub use runtime::{ExecutableImage, Value};
