//! 型チェック済みのモジュール表現
//!
//! コード生成器はこの表現だけを受け取るため、型チェックを通過していない
//! モジュールからコードが生成されることはありません。

use crate::ir::{BinaryOp, IntType, Span, UnaryOp};

/// 解決済みの整数型を持つ式
#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub kind: TypedExprKind,
    pub ty: IntType,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedExprKind {
    Literal(i128),
    Unary {
        op: UnaryOp,
        operand: Box<TypedExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },
    Cast(Box<TypedExpr>),
}

/// 型チェック済みの関数
#[derive(Debug, Clone, PartialEq)]
pub struct CheckedFunction {
    pub path: String,
    pub return_type: Option<IntType>,
    pub body: Vec<TypedExpr>,
    pub is_entry: bool,
    pub span: Span,
}

impl CheckedFunction {
    /// 関数の値となる最後の式（戻り値型がない場合は`None`）
    pub fn value(&self) -> Option<&TypedExpr> {
        self.return_type.and(self.body.last())
    }
}

/// 型チェック済みのモジュールグラフ（宣言順、深さ優先で平坦化）
#[derive(Debug, Clone, PartialEq)]
pub struct CheckedModule {
    functions: Vec<CheckedFunction>,
}

impl CheckedModule {
    pub(crate) fn new(functions: Vec<CheckedFunction>) -> Self {
        Self { functions }
    }

    pub fn functions(&self) -> &[CheckedFunction] {
        &self.functions
    }

    pub fn entry(&self) -> Option<&CheckedFunction> {
        self.functions.iter().find(|f| f.is_entry)
    }

    pub fn function(&self, path: &str) -> Option<&CheckedFunction> {
        self.functions.iter().find(|f| f.path == path)
    }
}
