//! Internal representation for gameplay scripts.
//!
//! The IR only knows about zero-argument functions returning fixed-width
//! integers, integer literals and a handful of operators. Everything else the
//! host syntax allows is rejected by the [`builder`] before it gets here.

pub mod builder;
pub mod resolver;

use serde::Serialize;
use std::fmt;

pub use builder::ModuleBuilder;
pub use resolver::{MemoryResolver, ModuleResolver, NoModules, ResolvedModule};

/// Source location of an IR node (1-based line, 0-based column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    pub fn dummy() -> Self {
        Self::default()
    }

    /// Span of any syn node. Requires proc-macro2's `span-locations`.
    pub fn of(node: &impl syn::spanned::Spanned) -> Self {
        let start = node.span().start();
        Self {
            line: start.line,
            column: start.column,
        }
    }

    /// Byte offset of this span inside `source`, clamped to its length.
    pub fn byte_offset(&self, source: &str) -> usize {
        if self.line == 0 {
            return 0;
        }
        let mut offset = 0;
        for (index, line) in source.split_inclusive('\n').enumerate() {
            if index + 1 == self.line {
                let column: usize = line
                    .chars()
                    .take(self.column)
                    .map(char::len_utf8)
                    .sum();
                return offset + column;
            }
            offset += line.len();
        }
        source.len()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column + 1)
    }
}

/// Fixed-width integer types a script may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl IntType {
    pub const ALL: [IntType; 8] = [
        IntType::I8,
        IntType::I16,
        IntType::I32,
        IntType::I64,
        IntType::U8,
        IntType::U16,
        IntType::U32,
        IntType::U64,
    ];

    /// Resolve a type name as written in source
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            IntType::I8 => "i8",
            IntType::I16 => "i16",
            IntType::I32 => "i32",
            IntType::I64 => "i64",
            IntType::U8 => "u8",
            IntType::U16 => "u16",
            IntType::U32 => "u32",
            IntType::U64 => "u64",
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            IntType::I8 | IntType::U8 => 8,
            IntType::I16 | IntType::U16 => 16,
            IntType::I32 | IntType::U32 => 32,
            IntType::I64 | IntType::U64 => 64,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntType::I8 | IntType::I16 | IntType::I32 | IntType::I64)
    }

    pub fn min_value(self) -> i128 {
        if self.is_signed() {
            -(1i128 << (self.bits() - 1))
        } else {
            0
        }
    }

    pub fn max_value(self) -> i128 {
        if self.is_signed() {
            (1i128 << (self.bits() - 1)) - 1
        } else {
            (1i128 << self.bits()) - 1
        }
    }

    pub fn contains(self, value: i128) -> bool {
        (self.min_value()..=self.max_value()).contains(&value)
    }

    /// The 64-bit register image of `value` once normalised to this type:
    /// sign-extended for signed types, zero-extended for unsigned ones.
    pub fn register_image(self, value: i128) -> u64 {
        let bits = self.bits();
        let truncated = (value as u64) & (u64::MAX >> (64 - bits));
        if self.is_signed() && bits < 64 && (truncated >> (bits - 1)) & 1 == 1 {
            truncated | (u64::MAX << bits)
        } else {
            truncated
        }
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Render an optional return type the way it is written in source
pub fn return_type_name(ty: Option<IntType>) -> String {
    match ty {
        Some(ty) => ty.to_string(),
        None => "()".to_string(),
    }
}

/// A script module: a file, an inline `mod` block or a resolved `mod m;`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub modules: Vec<Module>,
    pub span: Span,
}

impl Module {
    /// All functions of the module graph, depth-first in declaration order
    pub fn all_functions(&self) -> Vec<&Function> {
        let mut functions = Vec::new();
        self.collect_functions(&mut functions);
        functions
    }

    fn collect_functions<'m>(&'m self, out: &mut Vec<&'m Function>) {
        out.extend(self.functions.iter());
        for module in &self.modules {
            module.collect_functions(out);
        }
    }

    /// The function carrying the entry marker
    pub fn entry(&self) -> Option<&Function> {
        self.all_functions().into_iter().find(|f| f.is_entry)
    }
}

/// A zero-argument function returning an integer (or nothing)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Function {
    pub name: String,
    /// Path from the root module, e.g. `physics::gravity`
    pub path: String,
    pub return_type: Option<IntType>,
    pub body: Vec<Expression>,
    /// The body ends in a value expression (no trailing `;`, or a `return e`)
    pub tail: bool,
    pub is_entry: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        })
    }
}

/// Integer literal; negated literals are folded into a negative `value`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegerLit {
    pub value: i128,
    pub suffix: Option<IntType>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expression {
    Literal(IntegerLit),
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
        span: Span,
    },
    Cast {
        expr: Box<Expression>,
        target: IntType,
        span: Span,
    },
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Expression::Literal(lit) => lit.span,
            Expression::Unary { span, .. }
            | Expression::Binary { span, .. }
            | Expression::Cast { span, .. } => *span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_type_ranges() {
        assert_eq!(IntType::U32.max_value(), u32::MAX as i128);
        assert_eq!(IntType::I8.min_value(), -128);
        assert_eq!(IntType::U64.max_value(), u64::MAX as i128);
        assert!(IntType::I64.contains(i64::MIN as i128));
        assert!(!IntType::U8.contains(256));
        assert!(!IntType::U16.contains(-1));
    }

    #[test]
    fn test_register_image() {
        assert_eq!(IntType::I32.register_image(-1), u64::MAX);
        assert_eq!(IntType::U32.register_image(u32::MAX as i128), 0xFFFF_FFFF);
        assert_eq!(IntType::I8.register_image(-128), 0xFFFF_FFFF_FFFF_FF80);
        assert_eq!(IntType::U8.register_image(200), 200);
        assert_eq!(IntType::I64.register_image(i64::MIN as i128), 1 << 63);
    }

    #[test]
    fn test_span_byte_offset() {
        let source = "fn a() {}\nfn main() -> u32 { 500 }\n";
        assert_eq!(Span::new(2, 3).byte_offset(source), 13);
        assert_eq!(Span::new(9, 0).byte_offset(source), source.len());
    }
}
