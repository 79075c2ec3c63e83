//! Function-level code generation.

use indexmap::IndexMap;

use super::unit::{CompiledUnit, FunctionOffset};
use super::x64::{Assembler, Register};
use crate::analyzer::{CheckedFunction, CheckedModule};
use crate::error::CodegenError;

/// Register every expression is materialised into; also the return register
pub(crate) const RESULT: Register = Register::Rax;
/// Holds the right-hand operand of binary operators
pub(crate) const SCRATCH: Register = Register::Rcx;

/// Single-pass x86-64 code generator
#[derive(Debug, Default)]
pub struct CodeGenerator {
    pub(crate) asm: Assembler,
    functions: IndexMap<String, FunctionOffset>,
    entry: Option<String>,
    /// Function being compiled, for error reporting
    pub(crate) current_function: String,
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower every function of a checked module into one contiguous unit.
    /// Any construct without a lowering aborts the whole module.
    pub fn generate(mut self, module: &CheckedModule) -> Result<CompiledUnit, CodegenError> {
        for function in module.functions() {
            self.compile_function(function)?;
        }

        let entry = self.entry.ok_or(CodegenError::MissingEntry)?;
        let (code, listing) = self.asm.finish();
        log::debug!(
            "generated {} bytes for {} functions (entry {} at {:#x})",
            code.len(),
            self.functions.len(),
            entry,
            self.functions[entry.as_str()].offset
        );
        Ok(CompiledUnit::new(code, self.functions, entry, listing))
    }

    fn compile_function(&mut self, function: &CheckedFunction) -> Result<(), CodegenError> {
        self.current_function = function.path.clone();
        let start = self.asm.offset();

        // prologue
        self.asm.push(Register::Rbp);
        self.asm.mov(Register::Rbp, Register::Rsp);

        // Each expression overwrites RESULT; the last one is the return value.
        for expr in &function.body {
            self.compile_expression(expr)?;
        }

        // epilogue
        self.asm.pop(Register::Rbp);
        self.asm.ret();

        self.functions.insert(
            function.path.clone(),
            FunctionOffset {
                offset: start,
                len: self.asm.offset() - start,
                return_type: function.return_type,
            },
        );
        if function.is_entry {
            self.entry = Some(function.path.clone());
        }
        Ok(())
    }
}
