//! syn構文木からIRを構築する
//!
//! 外部パーサー(syn)が受け付ける文法全体のうち、JITが扱える
//! 整数関数のサブセットだけをIRに変換し、それ以外はできるだけ早く拒否します。

use std::collections::HashSet;

use quote::ToTokens;
use syn::{BinOp, Expr, Item, Lit, ReturnType, Stmt, Type, UnOp};

use super::resolver::ModuleResolver;
use super::{BinaryOp, Expression, Function, IntType, IntegerLit, Module, Span, UnaryOp};
use crate::compiler::CompileOptions;
use crate::error::ScriptError;

/// エントリーマーカー以外に許可する属性（コード生成に影響しない）
const INERT_ATTRIBUTES: [&str; 4] = ["doc", "allow", "inline", "must_use"];

/// ルートモジュールの名前
pub const ROOT_MODULE: &str = "crate";

/// IRビルダー
pub struct ModuleBuilder<'a> {
    options: &'a CompileOptions,
    resolver: &'a dyn ModuleResolver,
    /// 見つかったエントリー関数（パスと位置）
    entries: Vec<(String, Span)>,
    /// 解決中のモジュールキー（循環検出用）
    resolving: Vec<String>,
}

impl<'a> ModuleBuilder<'a> {
    pub fn new(options: &'a CompileOptions, resolver: &'a dyn ModuleResolver) -> Self {
        Self {
            options,
            resolver,
            entries: Vec::new(),
            resolving: Vec::new(),
        }
    }

    /// ファイル全体をIRモジュールに変換
    pub fn build(mut self, file: &syn::File) -> Result<Module, ScriptError> {
        let module = self.build_module(ROOT_MODULE, &file.items, &[], Span::dummy())?;

        match self.entries.len() {
            0 => Err(ScriptError::MissingEntry {
                attribute: self.options.entry_attribute.clone(),
            }),
            1 => {
                log::debug!(
                    "built module graph: {} functions, entry {}",
                    module.all_functions().len(),
                    self.entries[0].0
                );
                Ok(module)
            }
            _ => Err(ScriptError::MultipleEntries {
                attribute: self.options.entry_attribute.clone(),
                functions: self.entries.iter().map(|(path, _)| path.clone()).collect(),
                span: self.entries[1].1,
            }),
        }
    }

    fn build_module(
        &mut self,
        name: &str,
        items: &[Item],
        path: &[String],
        span: Span,
    ) -> Result<Module, ScriptError> {
        let mut functions = Vec::new();
        let mut modules = Vec::new();
        let mut seen = HashSet::new();

        for item in items {
            match item {
                Item::Fn(item_fn) => {
                    let function = self.build_function(item_fn, path)?;
                    if !seen.insert(function.name.clone()) {
                        return Err(ScriptError::DuplicateFunction {
                            name: function.path,
                            span: function.span,
                        });
                    }
                    functions.push(function);
                }
                Item::Mod(item_mod) => modules.push(self.build_nested_module(item_mod, path)?),
                other => {
                    return Err(ScriptError::UnsupportedItem {
                        kind: item_kind(other).to_string(),
                        span: Span::of(other),
                    })
                }
            }
        }

        Ok(Module {
            name: name.to_string(),
            functions,
            modules,
            span,
        })
    }

    fn build_nested_module(
        &mut self,
        item_mod: &syn::ItemMod,
        parent: &[String],
    ) -> Result<Module, ScriptError> {
        check_inert_attributes(&item_mod.attrs)?;

        let name = item_mod.ident.to_string();
        let span = Span::of(&item_mod.ident);
        let mut path = parent.to_vec();
        path.push(name.clone());

        if path.len() > self.options.max_module_depth {
            return Err(ScriptError::ModuleTooDeep {
                path: path.join("::"),
                limit: self.options.max_module_depth,
                span,
            });
        }

        if let Some((_, items)) = &item_mod.content {
            return self.build_module(&name, items, &path, span);
        }

        let resolved = self
            .resolver
            .resolve(&path)
            .ok_or_else(|| ScriptError::UnresolvedModule {
                path: path.join("::"),
                span,
            })?;

        if self.resolving.contains(&resolved.key) {
            return Err(ScriptError::CyclicModule {
                path: path.join("::"),
                key: resolved.key,
                span,
            });
        }

        log::trace!("resolved module {} from {}", path.join("::"), resolved.key);
        self.resolving.push(resolved.key);
        let module = self.build_module(&name, &resolved.file.items, &path, span);
        self.resolving.pop();
        module
    }

    fn build_function(&mut self, item_fn: &syn::ItemFn, path: &[String]) -> Result<Function, ScriptError> {
        let name = item_fn.sig.ident.to_string();
        let qualified = qualify(path, &name);
        let span = Span::of(&item_fn.sig.ident);

        let is_entry = self.entry_marker(&item_fn.attrs, &qualified)?;
        check_signature(&item_fn.sig, &qualified, span)?;

        let return_type = match &item_fn.sig.output {
            ReturnType::Default => None,
            ReturnType::Type(_, ty) => resolve_type(ty)?,
        };

        let mut body = Vec::new();
        let mut tail = false;
        let stmts = &item_fn.block.stmts;
        for (index, stmt) in stmts.iter().enumerate() {
            let is_last = index + 1 == stmts.len();
            match stmt {
                Stmt::Expr(Expr::Return(ret), _) => {
                    if !is_last {
                        return Err(ScriptError::MisplacedReturn {
                            function: qualified,
                            span: Span::of(ret),
                        });
                    }
                    if let Some(value) = &ret.expr {
                        body.push(lower_expr(value, &qualified)?);
                        tail = true;
                    }
                }
                Stmt::Expr(expr, semi) => {
                    body.push(lower_expr(expr, &qualified)?);
                    tail = is_last && semi.is_none();
                }
                Stmt::Local(local) => return Err(unsupported_statement(&qualified, "let binding", Span::of(local))),
                Stmt::Item(item) => return Err(unsupported_statement(&qualified, "nested item", Span::of(item))),
                Stmt::Macro(mac) => {
                    return Err(unsupported_statement(&qualified, "macro invocation", Span::of(mac)))
                }
            }
        }

        if is_entry {
            self.entries.push((qualified.clone(), span));
        }
        log::trace!("function {} -> {:?} ({} expressions)", qualified, return_type, body.len());

        Ok(Function {
            name,
            path: qualified,
            return_type,
            body,
            tail,
            is_entry,
            span,
        })
    }

    /// エントリーマーカーの有無を判定し、その他の属性を検証
    fn entry_marker(&self, attrs: &[syn::Attribute], function: &str) -> Result<bool, ScriptError> {
        let mut is_entry = false;
        for attr in attrs {
            if attr.path().is_ident(&self.options.entry_attribute) {
                if !matches!(attr.meta, syn::Meta::Path(_)) {
                    return Err(ScriptError::EntryArguments {
                        attribute: self.options.entry_attribute.clone(),
                        function: function.to_string(),
                        span: Span::of(attr),
                    });
                }
                is_entry = true;
            } else {
                check_inert_attribute(attr)?;
            }
        }
        Ok(is_entry)
    }
}

fn qualify(path: &[String], name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", path.join("::"), name)
    }
}

fn check_inert_attributes(attrs: &[syn::Attribute]) -> Result<(), ScriptError> {
    attrs.iter().try_for_each(check_inert_attribute)
}

fn check_inert_attribute(attr: &syn::Attribute) -> Result<(), ScriptError> {
    let name = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect::<Vec<_>>()
        .join("::");
    if INERT_ATTRIBUTES.contains(&name.as_str()) {
        Ok(())
    } else {
        Err(ScriptError::UnsupportedAttribute {
            name,
            span: Span::of(attr),
        })
    }
}

/// 関数シグネチャが制限されたサブセットに収まるか検証
fn check_signature(sig: &syn::Signature, function: &str, span: Span) -> Result<(), ScriptError> {
    let reason = if sig.asyncness.is_some() {
        Some("async関数は使用できません")
    } else if sig.unsafety.is_some() {
        Some("unsafe関数は使用できません")
    } else if sig.abi.is_some() {
        Some("ABIの指定は使用できません")
    } else if !sig.generics.params.is_empty() || sig.generics.where_clause.is_some() {
        Some("ジェネリック関数は使用できません")
    } else if !sig.inputs.is_empty() || sig.variadic.is_some() {
        Some("関数は引数を取れません")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ScriptError::UnsupportedSignature {
            function: function.to_string(),
            reason: reason.to_string(),
            span,
        }),
        None => Ok(()),
    }
}

/// 型を解決（`()`は`None`）
fn resolve_type(ty: &Type) -> Result<Option<IntType>, ScriptError> {
    match ty {
        Type::Tuple(tuple) if tuple.elems.is_empty() => Ok(None),
        Type::Paren(paren) => resolve_type(&paren.elem),
        Type::Group(group) => resolve_type(&group.elem),
        Type::Path(type_path) if type_path.qself.is_none() => {
            let ident = type_path.path.get_ident().map(|ident| ident.to_string());
            match ident.as_deref().and_then(IntType::from_name) {
                Some(int_type) => Ok(Some(int_type)),
                None => Err(unsupported_type(ty)),
            }
        }
        _ => Err(unsupported_type(ty)),
    }
}

fn unsupported_type(ty: &Type) -> ScriptError {
    ScriptError::UnsupportedType {
        ty: ty.to_token_stream().to_string(),
        span: Span::of(ty),
    }
}

fn unsupported_statement(function: &str, kind: &str, span: Span) -> ScriptError {
    ScriptError::UnsupportedStatement {
        function: function.to_string(),
        kind: kind.to_string(),
        span,
    }
}

fn unsupported_expression(function: &str, kind: &str, span: Span) -> ScriptError {
    ScriptError::UnsupportedExpression {
        function: function.to_string(),
        kind: kind.to_string(),
        span,
    }
}

/// 式をIRに変換
fn lower_expr(expr: &Expr, function: &str) -> Result<Expression, ScriptError> {
    let span = Span::of(expr);
    match expr {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            Lit::Int(int) => integer_literal(int, false, span),
            Lit::Float(_) => Err(unsupported_expression(function, "floating point literal", span)),
            Lit::Bool(_) => Err(unsupported_expression(function, "boolean literal", span)),
            _ => Err(unsupported_expression(function, "non-integer literal", span)),
        },
        Expr::Paren(paren) => lower_expr(&paren.expr, function),
        Expr::Group(group) => lower_expr(&group.expr, function),
        Expr::Unary(unary) => match (&unary.op, unary.expr.as_ref()) {
            // `-5` は負のリテラルとして畳み込む
            (UnOp::Neg(_), Expr::Lit(syn::ExprLit { lit: Lit::Int(int), .. })) => {
                integer_literal(int, true, span)
            }
            (UnOp::Neg(_), operand) => Ok(Expression::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(lower_expr(operand, function)?),
                span,
            }),
            (UnOp::Not(_), operand) => Ok(Expression::Unary {
                op: UnaryOp::Not,
                operand: Box::new(lower_expr(operand, function)?),
                span,
            }),
            (UnOp::Deref(_), _) => Err(unsupported_expression(function, "dereference", span)),
            _ => Err(unsupported_expression(function, "unary operator", span)),
        },
        Expr::Binary(binary) => {
            let op = binary_op(&binary.op)
                .ok_or_else(|| unsupported_expression(function, binary_op_kind(&binary.op), span))?;
            Ok(Expression::Binary {
                op,
                lhs: Box::new(lower_expr(&binary.left, function)?),
                rhs: Box::new(lower_expr(&binary.right, function)?),
                span,
            })
        }
        Expr::Cast(cast) => {
            let target = resolve_type(&cast.ty)?.ok_or_else(|| unsupported_type(&cast.ty))?;
            Ok(Expression::Cast {
                expr: Box::new(lower_expr(&cast.expr, function)?),
                target,
                span,
            })
        }
        other => Err(unsupported_expression(function, expr_kind(other), span)),
    }
}

fn integer_literal(int: &syn::LitInt, negative: bool, span: Span) -> Result<Expression, ScriptError> {
    let written = if negative {
        format!("-{}", int)
    } else {
        int.to_string()
    };

    let suffix = match int.suffix() {
        "" => None,
        name => Some(IntType::from_name(name).ok_or_else(|| ScriptError::UnsupportedType {
            ty: name.to_string(),
            span,
        })?),
    };

    let magnitude = int
        .base10_parse::<u64>()
        .map_err(|_| ScriptError::LiteralOutOfRange {
            literal: written.clone(),
            ty: suffix.map_or("u64", IntType::name).to_string(),
            span,
        })?;
    let value = if negative {
        -(magnitude as i128)
    } else {
        magnitude as i128
    };

    // 負の値はi64より広い型に推論されることはない
    let range = suffix.unwrap_or(if negative { IntType::I64 } else { IntType::U64 });
    if !range.contains(value) {
        return Err(ScriptError::LiteralOutOfRange {
            literal: written,
            ty: range.to_string(),
            span,
        });
    }

    Ok(Expression::Literal(IntegerLit { value, suffix, span }))
}

fn binary_op(op: &BinOp) -> Option<BinaryOp> {
    match op {
        BinOp::Add(_) => Some(BinaryOp::Add),
        BinOp::Sub(_) => Some(BinaryOp::Sub),
        BinOp::Mul(_) => Some(BinaryOp::Mul),
        BinOp::Div(_) => Some(BinaryOp::Div),
        BinOp::Rem(_) => Some(BinaryOp::Rem),
        BinOp::BitAnd(_) => Some(BinaryOp::BitAnd),
        BinOp::BitOr(_) => Some(BinaryOp::BitOr),
        BinOp::BitXor(_) => Some(BinaryOp::BitXor),
        BinOp::Shl(_) => Some(BinaryOp::Shl),
        BinOp::Shr(_) => Some(BinaryOp::Shr),
        _ => None,
    }
}

fn binary_op_kind(op: &BinOp) -> &'static str {
    match op {
        BinOp::And(_) | BinOp::Or(_) => "logical operator",
        BinOp::Eq(_) | BinOp::Lt(_) | BinOp::Le(_) | BinOp::Ne(_) | BinOp::Ge(_) | BinOp::Gt(_) => {
            "comparison"
        }
        _ => "compound assignment",
    }
}

fn item_kind(item: &Item) -> &'static str {
    match item {
        Item::Const(_) => "const item",
        Item::Enum(_) => "enum",
        Item::ExternCrate(_) => "extern crate",
        Item::ForeignMod(_) => "extern block",
        Item::Impl(_) => "impl block",
        Item::Macro(_) => "macro invocation",
        Item::Static(_) => "static item",
        Item::Struct(_) => "struct",
        Item::Trait(_) | Item::TraitAlias(_) => "trait",
        Item::Type(_) => "type alias",
        Item::Union(_) => "union",
        Item::Use(_) => "use declaration",
        _ => "item",
    }
}

fn expr_kind(expr: &Expr) -> &'static str {
    match expr {
        Expr::Array(_) | Expr::Repeat(_) => "array",
        Expr::Assign(_) => "assignment",
        Expr::Async(_) | Expr::Await(_) => "async code",
        Expr::Block(_) | Expr::Unsafe(_) | Expr::Const(_) => "block",
        Expr::Break(_) | Expr::Continue(_) => "loop control",
        Expr::Call(_) => "function call",
        Expr::MethodCall(_) => "method call",
        Expr::Closure(_) => "closure",
        Expr::Field(_) => "field access",
        Expr::ForLoop(_) | Expr::Loop(_) | Expr::While(_) => "loop",
        Expr::If(_) | Expr::Match(_) | Expr::Let(_) => "conditional",
        Expr::Index(_) => "indexing",
        Expr::Macro(_) => "macro invocation",
        Expr::Path(_) => "path",
        Expr::Range(_) => "range",
        Expr::Reference(_) => "reference",
        Expr::Return(_) => "return",
        Expr::Struct(_) => "struct literal",
        Expr::Try(_) | Expr::TryBlock(_) => "`?` operator",
        Expr::Tuple(_) => "tuple",
        _ => "expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::NoModules;

    fn build(source: &str) -> Result<Module, ScriptError> {
        let file = syn::parse_file(source).expect("test source should parse");
        let options = CompileOptions::default();
        ModuleBuilder::new(&options, &NoModules).build(&file)
    }

    #[test]
    fn test_negative_literal_is_folded() {
        let module = build("#[entry] fn main() -> i32 { -5 }").unwrap();
        assert_eq!(
            module.functions[0].body,
            vec![Expression::Literal(IntegerLit {
                value: -5,
                suffix: None,
                span: module.functions[0].body[0].span(),
            })]
        );
    }

    #[test]
    fn test_hex_literal_is_parsed() {
        let module = build("#[entry] fn main() -> u64 { 0xFFFF_FFFFu64 }").unwrap();
        match &module.functions[0].body[0] {
            Expression::Literal(lit) => {
                assert_eq!(lit.value, 0xFFFF_FFFF);
                assert_eq!(lit.suffix, Some(IntType::U64));
            }
            other => panic!("expected a literal, got {:?}", other),
        }
    }

    #[test]
    fn test_trailing_return_is_the_value() {
        let module = build("#[entry] fn main() -> u8 { 1; return 2; }").unwrap();
        assert_eq!(module.functions[0].body.len(), 2);
        assert!(module.functions[0].tail);
    }

    #[test]
    fn test_trailing_semicolon_discards_the_value() {
        let module = build("#[entry] fn main() -> u8 { 1; 2; }").unwrap();
        assert_eq!(module.functions[0].body.len(), 2);
        assert!(!module.functions[0].tail);

        let module = build("#[entry] fn main() { return; }").unwrap();
        assert!(module.functions[0].body.is_empty());
        assert!(!module.functions[0].tail);
    }

    #[test]
    fn test_return_must_be_last() {
        let error = build("#[entry] fn main() -> u8 { return 2; 3 }").unwrap_err();
        assert!(matches!(error, ScriptError::MisplacedReturn { .. }));
    }

    #[test]
    fn test_entry_attribute_name_is_configurable() {
        let file = syn::parse_file("#[level_start] fn start() -> u16 { 1 }").unwrap();
        let options = CompileOptions {
            entry_attribute: "level_start".to_string(),
            ..CompileOptions::default()
        };
        let module = ModuleBuilder::new(&options, &NoModules).build(&file).unwrap();
        assert!(module.functions[0].is_entry);
    }
}
