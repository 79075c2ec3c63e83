//! The output of code generation: machine code plus its offset table.

use indexmap::IndexMap;
use std::fmt::Write;

use super::x64::ListingEntry;
use crate::ir::IntType;

/// Where a compiled function lives inside its unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionOffset {
    pub offset: usize,
    pub len: usize,
    pub return_type: Option<IntType>,
}

/// Machine code for one script module graph.
///
/// Immutable once built. There is no symbol table or relocation: functions
/// are addressed by byte offset into `code`, and only the entry function is
/// meant to be called by the embedder.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUnit {
    code: Vec<u8>,
    functions: IndexMap<String, FunctionOffset>,
    entry: String,
    listing: Vec<ListingEntry>,
}

impl CompiledUnit {
    pub(crate) fn new(
        code: Vec<u8>,
        functions: IndexMap<String, FunctionOffset>,
        entry: String,
        listing: Vec<ListingEntry>,
    ) -> Self {
        debug_assert!(functions.contains_key(&entry));
        Self {
            code,
            functions,
            entry,
            listing,
        }
    }

    /// Wrap hand-assembled machine code as a unit with a single entry function.
    ///
    /// # Safety
    /// `code[entry_offset..]` must hold a function that follows the host C
    /// calling convention, takes no arguments and returns a value of
    /// `return_type` (or nothing) in the return register. Invoking a loaded
    /// image of a unit that breaks this is undefined behavior.
    pub unsafe fn from_raw_parts(code: Vec<u8>, entry_offset: usize, return_type: Option<IntType>) -> Self {
        let mut functions = IndexMap::new();
        functions.insert(
            "entry".to_string(),
            FunctionOffset {
                offset: entry_offset,
                len: code.len().saturating_sub(entry_offset),
                return_type,
            },
        );
        Self {
            code,
            functions,
            entry: "entry".to_string(),
            listing: Vec::new(),
        }
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Path of the entry function
    pub fn entry_path(&self) -> &str {
        &self.entry
    }

    pub fn entry(&self) -> FunctionOffset {
        self.functions[self.entry.as_str()]
    }

    pub fn entry_offset(&self) -> usize {
        self.entry().offset
    }

    pub fn entry_return_type(&self) -> Option<IntType> {
        self.entry().return_type
    }

    /// Offset table in emission order
    pub fn functions(&self) -> impl Iterator<Item = (&str, &FunctionOffset)> {
        self.functions.iter().map(|(path, offset)| (path.as_str(), offset))
    }

    pub fn function(&self, path: &str) -> Option<&FunctionOffset> {
        self.functions.get(path)
    }

    pub fn offset_of(&self, path: &str) -> Option<usize> {
        self.function(path).map(|f| f.offset)
    }

    /// Instruction listing recorded during generation (empty for raw units)
    pub fn listing(&self) -> &[ListingEntry] {
        &self.listing
    }

    /// Hex dump of the code, 16 bytes per row
    pub fn hex_dump(&self) -> String {
        let mut out = String::with_capacity(self.code.len() * 3 + 16);
        for (row, chunk) in self.code.chunks(16).enumerate() {
            let _ = write!(out, "{:08x}:", row * 16);
            for byte in chunk {
                let _ = write!(out, " {:02x}", byte);
            }
            out.push('\n');
        }
        out
    }

    /// Listing annotated with function labels
    pub fn disassembly(&self) -> String {
        let mut out = String::new();
        let mut labels: Vec<(&str, usize)> =
            self.functions().map(|(path, f)| (path, f.offset)).collect();
        labels.sort_by_key(|(_, offset)| *offset);
        let mut labels = labels.into_iter().peekable();

        for entry in &self.listing {
            while let Some((path, _)) = labels.next_if(|(_, offset)| *offset <= entry.offset) {
                let marker = if path == self.entry { " (entry)" } else { "" };
                let _ = writeln!(out, "{}:{}", path, marker);
            }
            let bytes = &self.code[entry.offset..entry.offset + entry.len];
            let hex: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            let _ = writeln!(out, "  {:#06x}  {:<30} {}", entry.offset, hex.join(" "), entry.text);
        }
        out
    }
}
