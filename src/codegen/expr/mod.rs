//! 式のコード生成モジュール
//!
//! 式の値は常にRESULTレジスタに、その型の正規化された64ビット表現
//! （符号付きは符号拡張、符号なしはゼロ拡張）で置かれます。

mod arithmetic;
mod literal;

use crate::analyzer::{TypedExpr, TypedExprKind};
use crate::codegen::code_generator::{CodeGenerator, RESULT};
use crate::error::CodegenError;
use crate::ir::IntType;

impl CodeGenerator {
    /// 式をコンパイル
    pub(crate) fn compile_expression(&mut self, expr: &TypedExpr) -> Result<(), CodegenError> {
        match &expr.kind {
            TypedExprKind::Literal(value) => {
                self.compile_integer_literal(*value, expr.ty);
                Ok(())
            }
            TypedExprKind::Unary { op, operand } => self.compile_unary(*op, operand, expr.ty),
            TypedExprKind::Binary { op, lhs, rhs } => self.compile_binary(*op, lhs, rhs, expr),
            TypedExprKind::Cast(inner) => {
                self.compile_expression(inner)?;
                self.normalize(expr.ty);
                Ok(())
            }
        }
    }

    /// RESULTの値を型の正規化表現に揃える
    pub(crate) fn normalize(&mut self, ty: IntType) {
        match ty {
            IntType::U8 => self.asm.movzx8(RESULT),
            IntType::U16 => self.asm.movzx16(RESULT),
            IntType::U32 => self.asm.zero_extend32(RESULT),
            IntType::I8 => self.asm.movsx8(RESULT),
            IntType::I16 => self.asm.movsx16(RESULT),
            IntType::I32 => self.asm.movsxd(RESULT),
            IntType::I64 | IntType::U64 => {}
        }
    }
}
