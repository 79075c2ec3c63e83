//! 統合テスト
//!
//! 構文木からネイティブ実行までのパイプライン全体、エラー報告、
//! モジュール解決、ホットリロードを検証する。
#![cfg(all(any(unix, windows), target_arch = "x86_64"))]

use gsr_jit::compiler::{self, CompileOptions, Compiler, HotReloader};
use gsr_jit::error::{JitError, ScriptError, TypeError};
use gsr_jit::ir::MemoryResolver;
use gsr_jit::runtime::Value;
#[macro_use]
extern crate pretty_assertions;
use test_case::test_case;

/// ソースを実行して結果を返すヘルパー関数
fn run(source: &str) -> Value {
    compiler::run_source(source).unwrap_or_else(|e| panic!("pipeline failed: {}", e))
}

/// 実行結果を符号付き128ビット整数として取り出す
fn run_i128(source: &str) -> i128 {
    run(source).as_i128().expect("entry should return a value")
}

#[test]
fn test_end_to_end_u32_literal() {
    let file: syn::File = syn::parse_quote! {
        #[entry]
        fn main() -> u32 { 500 }
    };
    let unit = compiler::compile(&file).unwrap();
    let image = compiler::load(&unit).unwrap();
    assert_eq!(image.invoke(), Value::U32(500));
    image.release();
}

#[test]
fn test_end_to_end_type_mismatch() {
    let error = compiler::run_source("#[entry] fn main() -> u32 { 4294967296 }").unwrap_err();
    assert!(matches!(
        error,
        JitError::Type(TypeError::TypeMismatch { ref declared, ref inferred, .. })
            if declared == "u32" && inferred == "i64"
    ));
}

#[test]
fn test_end_to_end_trailing_semicolon_is_rejected() {
    let error = compiler::run_source("#[entry] fn main() -> u32 { 500; }").unwrap_err();
    assert!(matches!(
        error,
        JitError::Type(TypeError::TypeMismatch { ref declared, ref inferred, .. })
            if declared == "u32" && inferred == "()"
    ));
}

#[test]
fn test_end_to_end_missing_entry() {
    let error = compiler::run_source("fn main() -> u32 { 500 }").unwrap_err();
    assert!(matches!(error, JitError::MalformedScript(ScriptError::MissingEntry { .. })));
}

#[test]
fn test_end_to_end_two_entries() {
    let error = compiler::run_source("#[entry] fn a() {}\n#[entry] fn b() {}").unwrap_err();
    assert!(matches!(error, JitError::MalformedScript(ScriptError::MultipleEntries { .. })));
}

#[test_case("0u64", 0; "zero")]
#[test_case("500u64", 500; "small")]
#[test_case("4294967295u64", 4_294_967_295; "u32 max")]
#[test_case("4294967296u64", 4_294_967_296; "first 64 bit value")]
#[test_case("18446744073709551615u64", u64::MAX as i128; "u64 max")]
fn test_literal_round_trip(literal: &str, expected: i128) {
    let source = format!("#[entry] fn main() -> u64 {{ {} }}", literal);
    assert_eq!(run_i128(&source), expected);
}

#[test_case("i8", -128; "i8 min")]
#[test_case("i16", -32768; "i16 min")]
#[test_case("i32", -2147483648; "i32 min")]
#[test_case("i64", -9223372036854775808; "i64 min")]
#[test_case("u8", 255; "u8 max")]
#[test_case("u16", 65535; "u16 max")]
#[test_case("u32", 4294967295; "u32 max")]
fn test_boundary_values_by_width(ty: &str, value: i128) {
    let source = format!("#[entry] fn main() -> {} {{ {} }}", ty, value);
    assert_eq!(run_i128(&source), value);
}

#[test_case("u8", "200 + 100", 200u8.wrapping_add(100) as i128; "u8 add wraps")]
#[test_case("u8", "3 - 5", 3u8.wrapping_sub(5) as i128; "u8 sub wraps")]
#[test_case("i8", "100 + 100", 100i8.wrapping_add(100) as i128; "i8 add wraps")]
#[test_case("i8", "-128 - 1", (-128i8).wrapping_sub(1) as i128; "i8 sub wraps")]
#[test_case("u16", "300 * 300", 300u16.wrapping_mul(300) as i128; "u16 mul wraps")]
#[test_case("i16", "-300 * 300", (-300i16).wrapping_mul(300) as i128; "i16 mul wraps")]
#[test_case("u32", "4000000000 + 4000000000", 4_000_000_000u32.wrapping_add(4_000_000_000) as i128; "u32 add wraps")]
#[test_case("i32", "2147483647 + 1", i32::MAX.wrapping_add(1) as i128; "i32 add wraps")]
#[test_case("u64", "18446744073709551615 + 2", u64::MAX.wrapping_add(2) as i128; "u64 add wraps")]
#[test_case("i64", "-9223372036854775808 - 1", i64::MIN.wrapping_sub(1) as i128; "i64 sub wraps")]
fn test_wrapping_arithmetic(ty: &str, expr: &str, expected: i128) {
    let source = format!("#[entry] fn main() -> {} {{ {} }}", ty, expr);
    assert_eq!(run_i128(&source), expected);
}

#[test_case("u8", "0xF0 & 0x3C", (0xF0u8 & 0x3C) as i128; "and")]
#[test_case("u8", "0xF0 | 0x0F", (0xF0u8 | 0x0F) as i128; "or")]
#[test_case("u16", "0xFF00 ^ 0x0FF0", (0xFF00u16 ^ 0x0FF0) as i128; "xor")]
#[test_case("u8", "!0", !0u8 as i128; "not u8")]
#[test_case("i32", "!5", !5i32 as i128; "not i32")]
#[test_case("i16", "-(-32768)", (-32768i16).wrapping_neg() as i128; "neg i16 min")]
fn test_bitwise_and_unary(ty: &str, expr: &str, expected: i128) {
    let source = format!("#[entry] fn main() -> {} {{ {} }}", ty, expr);
    assert_eq!(run_i128(&source), expected);
}

#[test_case("u8", "1 << 7", 1u8.wrapping_shl(7) as i128; "u8 shl")]
#[test_case("u8", "1 << 9", 1u8.wrapping_shl(9) as i128; "u8 shl masked")]
#[test_case("i8", "-128 >> 3", (-128i8).wrapping_shr(3) as i128; "i8 arithmetic shr")]
#[test_case("u8", "128 >> 3", 128u8.wrapping_shr(3) as i128; "u8 logical shr")]
#[test_case("i32", "-1 >> 40", (-1i32).wrapping_shr(40) as i128; "i32 shr masked")]
#[test_case("u64", "1 << 63", 1u64.wrapping_shl(63) as i128; "u64 top bit")]
#[test_case("u16", "0xFFFF << 4", 0xFFFFu16.wrapping_shl(4) as i128; "u16 shl drops bits")]
fn test_shifts(ty: &str, expr: &str, expected: i128) {
    let source = format!("#[entry] fn main() -> {} {{ {} }}", ty, expr);
    assert_eq!(run_i128(&source), expected);
}

#[test_case("u8", "300 as u8", 300i32 as u8 as i128; "truncate to u8")]
#[test_case("i8", "200u8 as i8", 200u8 as i8 as i128; "reinterpret as i8")]
#[test_case("u64", "-1i32 as u64", -1i32 as u64 as i128; "sign extend into u64")]
#[test_case("u64", "-1i8 as u8 as u64", -1i8 as u8 as u64 as i128; "cast chain")]
#[test_case("i32", "4294967295u32 as i32", 4294967295u32 as i32 as i128; "u32 to i32")]
#[test_case("i64", "65535u16 as i64", 65535u16 as i64 as i128; "zero extend into i64")]
#[test_case("i16", "(70000u32 as i16) + 1", (70000u32 as i16).wrapping_add(1) as i128; "cast then add")]
fn test_casts(ty: &str, expr: &str, expected: i128) {
    let source = format!("#[entry] fn main() -> {} {{ {} }}", ty, expr);
    assert_eq!(run_i128(&source), expected);
}

#[test]
fn test_nested_expression() {
    let value = run("#[entry] fn main() -> i64 { ((7 * 6) - 2) * -(3 + 1) + (1 << 10) }");
    assert_eq!(value, Value::I64(((7 * 6) - 2) * -(3 + 1) + (1 << 10)));
}

#[test]
fn test_return_statement() {
    assert_eq!(run("#[entry] fn main() -> u16 { 1; 2; return 3; }"), Value::U16(3));
}

#[test]
fn test_entry_in_nested_module_with_resolver() {
    let resolver = MemoryResolver::new()
        .with("rules", "mod scoring;\nfn bonus() -> u8 { 5 }")
        .with("rules::scoring", "#[entry] fn points() -> u32 { 1200 }");
    let compiler = Compiler::default().with_resolver(resolver);

    let unit = compiler.compile_source("mod rules;").unwrap();
    assert_eq!(unit.entry_path(), "rules::scoring::points");

    let image = compiler.load(&unit).unwrap();
    assert_eq!(image.invoke(), Value::U32(1200));
    assert_eq!(image.invoke_function("rules::bonus"), Some(Value::U8(5)));
}

#[test]
fn test_type_error_in_resolved_module_aborts() {
    let resolver = MemoryResolver::new().with("util", "fn big() -> u8 { 1000 }");
    let compiler = Compiler::default().with_resolver(resolver);
    let error = compiler
        .compile_source("#[entry] fn main() -> u8 { 1 }\nmod util;")
        .unwrap_err();
    assert!(matches!(
        error,
        JitError::Type(TypeError::TypeMismatch { ref function, .. }) if function == "util::big"
    ));
}

#[test]
fn test_custom_entry_attribute_pipeline() {
    let compiler = Compiler::new(CompileOptions {
        entry_attribute: "level_start".to_string(),
        ..CompileOptions::default()
    });
    let value = compiler
        .run_source("#[level_start] fn start() -> i8 { -7 }")
        .unwrap();
    assert_eq!(value, Value::I8(-7));
}

#[test]
fn test_parse_errors_surface_as_parse() {
    let error = compiler::run_source("#[entry] fn main( -> u32 { 1 }").unwrap_err();
    match error {
        JitError::Parse(message) => assert!(message.contains("1:"), "{}", message),
        other => panic!("expected a parse error, got {:?}", other),
    }
}

#[test]
fn test_hot_reload_swaps_images() {
    let mut reloader = HotReloader::new(Compiler::default());
    assert!(reloader.current().is_none());
    assert_eq!(reloader.invoke(), None);

    let previous = reloader.reload_source("#[entry] fn main() -> u32 { 1 }").unwrap();
    assert!(previous.is_none());
    assert_eq!(reloader.invoke(), Some(Value::U32(1)));
    assert_eq!(reloader.generation(), 1);

    let previous = reloader.reload_source("#[entry] fn main() -> u32 { 2 }").unwrap();
    // 古いイメージは呼び出し側が破棄するまで有効
    let old = previous.expect("the first image should be handed back");
    assert_eq!(old.invoke(), Value::U32(1));
    old.release();

    assert_eq!(reloader.invoke(), Some(Value::U32(2)));
    assert_eq!(reloader.generation(), 2);
}

#[test]
fn test_hot_reload_failure_keeps_previous_image() {
    let mut reloader = HotReloader::new(Compiler::default());
    reloader.reload_source("#[entry] fn main() -> u64 { 42 }").unwrap();

    let error = reloader
        .reload_source("#[entry] fn main() -> u32 { 4294967296 }")
        .unwrap_err();
    assert!(matches!(error, JitError::Type(_)));
    assert_eq!(reloader.invoke(), Some(Value::U64(42)));
    assert_eq!(reloader.generation(), 1);

    let error = reloader.reload_source("fn main() -> u64 { 43 }").unwrap_err();
    assert!(matches!(error, JitError::MalformedScript(_)));
    assert_eq!(reloader.invoke(), Some(Value::U64(42)));
}

#[test]
fn test_hot_reload_can_change_return_type() {
    let mut reloader = HotReloader::new(Compiler::default());
    reloader.reload_source("#[entry] fn main() -> u8 { 255 }").unwrap();
    reloader.reload_source("#[entry] fn main() -> i64 { -1 }").unwrap();
    assert_eq!(reloader.invoke(), Some(Value::I64(-1)));

    let image = reloader.unload().unwrap();
    assert_eq!(image.entry_return_type().map(|t| t.to_string()), Some("i64".to_string()));
    assert!(reloader.current().is_none());
}

#[test]
fn test_hot_reload_from_syntax_tree() {
    let mut reloader = HotReloader::new(Compiler::default());
    let file: syn::File = syn::parse_quote! {
        #[entry]
        fn main() -> u16 { 40 + 2 }
    };
    reloader.reload(&file).unwrap();
    assert_eq!(reloader.invoke(), Some(Value::U16(42)));
}
