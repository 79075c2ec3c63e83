//! 算術・ビット演算式のコード生成
//!
//! 演算はすべてラップアラウンド。シフト量は型のビット幅でマスクする。

use crate::analyzer::TypedExpr;
use crate::codegen::code_generator::{CodeGenerator, RESULT, SCRATCH};
use crate::codegen::x64::{AluOp, ShiftOp};
use crate::error::CodegenError;
use crate::ir::{BinaryOp, IntType, UnaryOp};

/// 二項演算子に対応する命令
enum Lowering {
    Alu(AluOp),
    Mul,
    Shift(ShiftOp),
}

impl CodeGenerator {
    /// 単項演算子をコンパイル
    pub(crate) fn compile_unary(
        &mut self,
        op: UnaryOp,
        operand: &TypedExpr,
        ty: IntType,
    ) -> Result<(), CodegenError> {
        self.compile_expression(operand)?;
        match op {
            UnaryOp::Neg => self.asm.neg(RESULT),
            UnaryOp::Not => self.asm.not(RESULT),
        }
        self.normalize(ty);
        Ok(())
    }

    /// 二項演算子をコンパイル
    ///
    /// 左辺をスタックに退避して右辺を評価し、右辺をSCRATCHに移してから演算する。
    pub(crate) fn compile_binary(
        &mut self,
        op: BinaryOp,
        lhs: &TypedExpr,
        rhs: &TypedExpr,
        expr: &TypedExpr,
    ) -> Result<(), CodegenError> {
        let lowering = match op {
            BinaryOp::Add => Lowering::Alu(AluOp::Add),
            BinaryOp::Sub => Lowering::Alu(AluOp::Sub),
            BinaryOp::BitAnd => Lowering::Alu(AluOp::And),
            BinaryOp::BitOr => Lowering::Alu(AluOp::Or),
            BinaryOp::BitXor => Lowering::Alu(AluOp::Xor),
            BinaryOp::Mul => Lowering::Mul,
            BinaryOp::Shl => Lowering::Shift(ShiftOp::Shl),
            BinaryOp::Shr if expr.ty.is_signed() => Lowering::Shift(ShiftOp::Sar),
            BinaryOp::Shr => Lowering::Shift(ShiftOp::Shr),
            // ゼロ除算はネイティブコードでは例外になり、呼び出し側に伝える手段がない
            BinaryOp::Div | BinaryOp::Rem => {
                return Err(CodegenError::UnsupportedConstruct {
                    construct: format!("`{}` operator", op),
                    function: self.current_function.clone(),
                    span: expr.span,
                })
            }
        };

        self.compile_expression(lhs)?;
        self.asm.push(RESULT);
        self.compile_expression(rhs)?;
        self.asm.mov(SCRATCH, RESULT);
        self.asm.pop(RESULT);

        match lowering {
            Lowering::Alu(alu) => self.asm.alu(alu, RESULT, SCRATCH),
            Lowering::Mul => self.asm.imul(RESULT, SCRATCH),
            Lowering::Shift(shift) => {
                self.asm.and_imm8(SCRATCH, (expr.ty.bits() - 1) as i8);
                self.asm.shift_cl(shift, RESULT);
            }
        }

        self.normalize(expr.ty);
        Ok(())
    }
}
