//! Runtime support: executable memory and native invocation.
//!
//! A [`CompiledUnit`](crate::codegen::CompiledUnit) is copied into freshly
//! mapped pages that are then made read+execute, and the entry function is
//! called through a C-ABI function pointer whose return type matches the
//! script's declared return type.

mod invoke;
mod memory;

pub use invoke::Value;
pub use memory::{page_size, ExecutableImage};
