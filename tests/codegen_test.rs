//! コード生成テスト
//!
//! 生成されるx86-64マシンコードのバイト列・オフセット表・リスティングを検証する。
//! 実行はruntime_test.rsとpipeline_test.rsで行う。

use gsr_jit::codegen::{CompiledUnit, ImmediateForm};
use gsr_jit::compiler::Compiler;
use gsr_jit::error::{CodegenError, JitError};
use gsr_jit::ir::IntType;
#[macro_use]
extern crate pretty_assertions;
use test_case::test_case;

const PROLOGUE: [u8; 4] = [0x55, 0x48, 0x89, 0xE5];
const EPILOGUE: [u8; 2] = [0x5D, 0xC3];

/// ソースをコンパイルするヘルパー関数
fn compile(source: &str) -> CompiledUnit {
    Compiler::default()
        .compile_source(source)
        .unwrap_or_else(|e| panic!("compilation failed: {}", e))
}

/// プロローグ・エピローグで挟んだ関数本体
fn function(body: &[u8]) -> Vec<u8> {
    [&PROLOGUE[..], body, &EPILOGUE[..]].concat()
}

/// リスティングの命令テキスト（プロローグとエピローグを除く）
fn body_listing(unit: &CompiledUnit) -> Vec<String> {
    let texts: Vec<String> = unit.listing().iter().map(|e| e.text.clone()).collect();
    texts[2..texts.len() - 2].to_vec()
}

#[test]
fn test_u32_literal_entry() {
    let unit = compile("#[entry]\nfn main() -> u32 { 500 }\n");
    assert_eq!(unit.code(), function(&[0xB8, 0xF4, 0x01, 0x00, 0x00]).as_slice());
    assert_eq!(unit.entry_offset(), 0);
    assert_eq!(unit.entry_return_type(), Some(IntType::U32));
}

#[test]
fn test_empty_unit_function() {
    let unit = compile("#[entry] fn main() {}");
    assert_eq!(unit.code(), function(&[]).as_slice());
    assert_eq!(unit.entry_return_type(), None);
}

#[test]
fn test_u64_literal_uses_movabs() {
    let unit = compile("#[entry] fn main() -> u64 { 4294967296 }");
    assert_eq!(
        unit.code(),
        function(&[0x48, 0xB8, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]).as_slice()
    );
}

#[test]
fn test_u32_max_fits_short_form() {
    let unit = compile("#[entry] fn main() -> u64 { 4294967295 }");
    assert_eq!(unit.code(), function(&[0xB8, 0xFF, 0xFF, 0xFF, 0xFF]).as_slice());
}

#[test]
fn test_negative_literal_is_sign_extended() {
    let unit = compile("#[entry] fn main() -> i64 { -1 }");
    assert_eq!(
        unit.code(),
        function(&[0x48, 0xC7, 0xC0, 0xFF, 0xFF, 0xFF, 0xFF]).as_slice()
    );
}

#[test_case(0, IntType::U64 => ImmediateForm::Imm32; "zero")]
#[test_case(i64::from(i32::MIN) as i128, IntType::I64 => ImmediateForm::SignExtendedImm32; "i32 min")]
#[test_case(i64::from(i32::MIN) as i128 - 1, IntType::I64 => ImmediateForm::Imm64; "below i32 min")]
#[test_case(-1, IntType::I32 => ImmediateForm::SignExtendedImm32; "minus one i32")]
#[test_case(255, IntType::U8 => ImmediateForm::Imm32; "u8 max")]
fn test_immediate_form_selection(value: i128, ty: IntType) -> ImmediateForm {
    ImmediateForm::select(ty.register_image(value))
}

#[test]
fn test_add_sequence() {
    let unit = compile("#[entry] fn main() -> u64 { 1u64 + 2u64 }");
    let body = [
        0xB8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1
        0x50, // push rax
        0xB8, 0x02, 0x00, 0x00, 0x00, // mov eax, 2
        0x48, 0x89, 0xC1, // mov rcx, rax
        0x58, // pop rax
        0x48, 0x01, 0xC8, // add rax, rcx
    ];
    assert_eq!(unit.code(), function(&body).as_slice());
}

#[test]
fn test_u8_shift_masks_the_count() {
    let unit = compile("#[entry] fn main() -> u8 { 1u8 << 9u8 }");
    assert_eq!(
        body_listing(&unit),
        vec![
            "mov eax, 0x1",
            "push rax",
            "mov eax, 0x9",
            "mov rcx, rax",
            "pop rax",
            "and ecx, 0x7",
            "shl rax, cl",
            "movzx eax, al",
        ]
    );
}

#[test_case("#[entry] fn main() -> i32 { -8 >> 1 }" => "sar rax, cl"; "signed shift right")]
#[test_case("#[entry] fn main() -> u32 { 8 >> 1 }" => "shr rax, cl"; "unsigned shift right")]
#[test_case("#[entry] fn main() -> u64 { 3 * 4 }" => "imul rax, rcx"; "multiply")]
#[test_case("#[entry] fn main() -> u64 { 3 - 4 }" => "sub rax, rcx"; "subtract")]
#[test_case("#[entry] fn main() -> u64 { 3 & 4 }" => "and rax, rcx"; "and")]
#[test_case("#[entry] fn main() -> u64 { 3 | 4 }" => "or rax, rcx"; "or")]
#[test_case("#[entry] fn main() -> u64 { 3 ^ 4 }" => "xor rax, rcx"; "xor")]
fn test_operator_instruction(source: &str) -> String {
    let unit = compile(source);
    let listing = body_listing(&unit);
    // 演算命令は右辺の退避と復元の直後に来る
    let pop = listing.iter().position(|t| t == "pop rax").expect("binary ops pop the lhs");
    listing[pop + 1..]
        .iter()
        .find(|t| !t.starts_with("and ecx"))
        .cloned()
        .unwrap_or_default()
}

#[test_case(IntType::U8 => "movzx eax, al"; "u8")]
#[test_case(IntType::U16 => "movzx eax, ax"; "u16")]
#[test_case(IntType::U32 => "mov eax, eax"; "u32")]
#[test_case(IntType::I8 => "movsx rax, al"; "i8")]
#[test_case(IntType::I16 => "movsx rax, ax"; "i16")]
#[test_case(IntType::I32 => "movsxd rax, eax"; "i32")]
fn test_cast_normalizes_to_target(target: IntType) -> String {
    let unit = compile(&format!("#[entry] fn main() -> {t} {{ 70000u64 as {t} }}", t = target));
    body_listing(&unit).last().cloned().unwrap_or_default()
}

#[test]
fn test_cast_to_64_bits_emits_nothing_extra() {
    let unit = compile("#[entry] fn main() -> i64 { 7u64 as i64 }");
    assert_eq!(body_listing(&unit), vec!["mov eax, 0x7"]);
}

#[test]
fn test_unary_operators() {
    let unit = compile("#[entry] fn main() -> i8 { -(5i8) }");
    assert_eq!(body_listing(&unit), vec!["mov eax, 0x5", "neg rax", "movsx rax, al"]);

    let unit = compile("#[entry] fn main() -> u16 { !1 }");
    assert_eq!(body_listing(&unit), vec!["mov eax, 0x1", "not rax", "movzx eax, ax"]);
}

#[test_case("#[entry] fn main() -> u32 { 10 / 2 }" => "`/` operator"; "division")]
#[test_case("#[entry] fn main() -> u32 { 10 % 3 }" => "`%` operator"; "remainder")]
fn test_division_has_no_lowering(source: &str) -> String {
    match Compiler::default().compile_source(source).unwrap_err() {
        JitError::Codegen(CodegenError::UnsupportedConstruct { construct, function, .. }) => {
            assert_eq!(function, "main");
            construct
        }
        other => panic!("expected UnsupportedConstruct, got {:?}", other),
    }
}

#[test]
fn test_unsupported_construct_in_helper_aborts_the_unit() {
    let error = Compiler::default()
        .compile_source("#[entry] fn main() -> u8 { 1 }\nmod util { fn half() -> u8 { 4 / 2 } }")
        .unwrap_err();
    assert!(matches!(
        error,
        JitError::Codegen(CodegenError::UnsupportedConstruct { ref function, .. }) if function == "util::half"
    ));
}

#[test]
fn test_function_offsets() {
    let unit = compile(
        "fn helper() -> u8 { 1 }\n#[entry] fn main() -> u16 { 2 }\nmod m { fn f() {} }\n",
    );
    // helper: prologue(4) + mov(5) + epilogue(2)
    assert_eq!(unit.offset_of("helper"), Some(0));
    assert_eq!(unit.function("helper").map(|f| f.len), Some(11));
    assert_eq!(unit.entry_path(), "main");
    assert_eq!(unit.entry_offset(), 11);
    assert_eq!(unit.offset_of("m::f"), Some(22));
    assert_eq!(unit.len(), 28);

    let paths: Vec<&str> = unit.functions().map(|(path, _)| path).collect();
    assert_eq!(paths, vec!["helper", "main", "m::f"]);
}

#[test]
fn test_every_function_ends_with_ret() {
    let unit = compile("#[entry] fn a() -> u8 { 1 }\nfn b() -> i64 { -1 }\nfn c() {}\n");
    for (path, f) in unit.functions() {
        assert_eq!(unit.code()[f.offset + f.len - 1], 0xC3, "{} should end with ret", path);
        assert_eq!(&unit.code()[f.offset..f.offset + 4], &PROLOGUE, "{} should start with the prologue", path);
    }
}

#[test]
fn test_multiple_body_expressions_keep_the_last() {
    let unit = compile("#[entry] fn main() -> u8 { 1; 2 }");
    assert_eq!(body_listing(&unit), vec!["mov eax, 0x1", "mov eax, 0x2"]);
}

#[test]
fn test_disassembly_labels_functions() {
    let unit = compile("fn helper() -> u8 { 1 }\n#[entry] fn main() -> u32 { 500 }\n");
    let text = unit.disassembly();
    assert!(text.contains("helper:\n"), "{}", text);
    assert!(text.contains("main: (entry)\n"), "{}", text);
    assert!(text.contains("mov eax, 0x1f4"), "{}", text);
    assert!(unit.hex_dump().starts_with("00000000: 55 48 89 e5"));
}

#[test]
fn test_compile_is_deterministic() {
    let source = "#[entry] fn main() -> i16 { (3 * 4 - 5) << 2 }";
    assert_eq!(compile(source), compile(source));
}
