//! リテラル式のコード生成

use crate::codegen::code_generator::{CodeGenerator, RESULT};
use crate::codegen::x64::ImmediateForm;
use crate::ir::IntType;

impl CodeGenerator {
    /// 整数リテラルをコンパイル
    ///
    /// 32ビットに収まる値は短い即値ロード、それ以外は64ビット即値ロードを使う。
    pub(crate) fn compile_integer_literal(&mut self, value: i128, ty: IntType) -> ImmediateForm {
        let image = ty.register_image(value);
        let form = self.asm.mov_imm(RESULT, image);
        log::trace!("literal {}{} -> {:?}", value, ty, form);
        form
    }
}
