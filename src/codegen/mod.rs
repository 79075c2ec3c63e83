//! Code generation module for gameplay scripts.
//!
//! This module lowers a type-checked module directly into x86-64 machine
//! code. There is no optimisation pass and no register allocation: every
//! expression is materialised into `rax`, the return register of the host C
//! calling convention, and functions are laid out back to back.

mod code_generator;
mod expr;
mod unit;
pub mod x64;

pub use code_generator::CodeGenerator;
pub use unit::{CompiledUnit, FunctionOffset};
pub use x64::{ImmediateForm, ListingEntry};
