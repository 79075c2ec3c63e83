//! 統一的なエラーハンドリングモジュール
//!
//! このモジュールは、JITパイプライン全体で使用される統一的なエラー型と
//! エラー報告システムを提供します。各ステージは自身のエラー型を返し、
//! `JitError`がそれらを束ねます。

use crate::ir::Span;
use codespan_reporting::diagnostic::{Diagnostic, Label};
use thiserror::Error;

/// JITパイプラインの統一エラー型
#[derive(Error, Debug, Clone)]
pub enum JitError {
    /// IR構築エラー
    #[error("不正なスクリプト: {0}")]
    MalformedScript(#[from] ScriptError),

    /// 戻り値型チェックエラー
    #[error("型エラー: {0}")]
    Type(#[from] TypeError),

    /// コード生成エラー
    #[error("コード生成エラー: {0}")]
    Codegen(#[from] CodegenError),

    /// 実行可能メモリのエラー
    #[error("実行可能メモリエラー: {0}")]
    MemoryMap(#[from] MemoryMapError),

    /// 外部パーサー(syn)のエラー
    #[error("構文解析エラー: {0}")]
    Parse(String),

    /// ファイルI/Oエラー
    #[error("ファイル操作エラー: {0}")]
    Io(String),
}

/// IRビルダーのエラーの詳細
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("#[{attribute}] が付いた関数がありません")]
    MissingEntry { attribute: String },

    #[error("#[{attribute}] が複数の関数に付いています: {}", .functions.join(", "))]
    MultipleEntries {
        attribute: String,
        functions: Vec<String>,
        span: Span,
    },

    #[error("関数 {function} の #[{attribute}] は引数を取りません")]
    EntryArguments {
        attribute: String,
        function: String,
        span: Span,
    },

    #[error("モジュール {path} を解決できません")]
    UnresolvedModule { path: String, span: Span },

    #[error("モジュール {path} が {key} を通じて自身を含んでいます")]
    CyclicModule { path: String, key: String, span: Span },

    #[error("モジュール {path} の入れ子が {limit} 段を超えています")]
    ModuleTooDeep { path: String, limit: usize, span: Span },

    #[error("未対応の項目: {kind}")]
    UnsupportedItem { kind: String, span: Span },

    #[error("関数 {function}: {reason}")]
    UnsupportedSignature {
        function: String,
        reason: String,
        span: Span,
    },

    #[error("未対応の属性: #[{name}]")]
    UnsupportedAttribute { name: String, span: Span },

    #[error("未対応の型: `{ty}`")]
    UnsupportedType { ty: String, span: Span },

    #[error("関数 {function}: 未対応の文: {kind}")]
    UnsupportedStatement {
        function: String,
        kind: String,
        span: Span,
    },

    #[error("関数 {function}: 未対応の式: {kind}")]
    UnsupportedExpression {
        function: String,
        kind: String,
        span: Span,
    },

    #[error("関数 {function}: `return` は最後の文でなければなりません")]
    MisplacedReturn { function: String, span: Span },

    #[error("リテラル {literal} は {ty} に収まりません")]
    LiteralOutOfRange {
        literal: String,
        ty: String,
        span: Span,
    },

    #[error("関数 {name} は既に定義されています")]
    DuplicateFunction { name: String, span: Span },
}

/// 戻り値型チェックのエラーの詳細
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypeError {
    #[error("関数 {function} の戻り値型は {declared} ですが、本体の型は {inferred} です")]
    TypeMismatch {
        function: String,
        declared: String,
        inferred: String,
        span: Span,
    },

    #[error("関数 {function}: `{op}` の両辺の型が異なります ({lhs} と {rhs})")]
    OperandMismatch {
        function: String,
        op: String,
        lhs: String,
        rhs: String,
        span: Span,
    },

    #[error("関数 {function}: 符号なし型 {ty} の値は符号反転できません")]
    InvalidNegation {
        function: String,
        ty: String,
        span: Span,
    },
}

/// コード生成エラーの詳細
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodegenError {
    #[error("関数 {function}: {construct} のネイティブコードを生成できません")]
    UnsupportedConstruct {
        construct: String,
        function: String,
        span: Span,
    },

    #[error("エントリー関数がありません")]
    MissingEntry,
}

/// 実行可能メモリ管理のエラーの詳細
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryMapError {
    #[error("ページサイズを取得できません: {message}")]
    PageSize { message: String },

    #[error("{pages} ページはアドレス空間に収まりません")]
    SizeOverflow { pages: usize },

    #[error("空のコンパイル単位はマップできません")]
    EmptyUnit,

    #[error("{size} バイトのマップに失敗しました: {message}")]
    Map { size: usize, message: String },

    #[error("{size} バイトを実行可能にできませんでした: {message}")]
    Protect { size: usize, message: String },

    #[error("実行可能イメージにはx86-64のUnix系またはWindowsホストが必要です")]
    UnsupportedHost,
}

impl JitError {
    /// エラーのソース位置（存在する場合）
    pub fn span(&self) -> Option<Span> {
        match self {
            JitError::MalformedScript(e) => e.span(),
            JitError::Type(e) => Some(e.span()),
            JitError::Codegen(CodegenError::UnsupportedConstruct { span, .. }) => Some(*span),
            JitError::Codegen(CodegenError::MissingEntry)
            | JitError::MemoryMap(_) | JitError::Parse(_) | JitError::Io(_) => None,
        }
    }
}

impl ScriptError {
    pub fn span(&self) -> Option<Span> {
        match self {
            ScriptError::MissingEntry { .. } => None,
            ScriptError::MultipleEntries { span, .. }
            | ScriptError::EntryArguments { span, .. }
            | ScriptError::UnresolvedModule { span, .. }
            | ScriptError::CyclicModule { span, .. }
            | ScriptError::ModuleTooDeep { span, .. }
            | ScriptError::UnsupportedItem { span, .. }
            | ScriptError::UnsupportedSignature { span, .. }
            | ScriptError::UnsupportedAttribute { span, .. }
            | ScriptError::UnsupportedType { span, .. }
            | ScriptError::UnsupportedStatement { span, .. }
            | ScriptError::UnsupportedExpression { span, .. }
            | ScriptError::MisplacedReturn { span, .. }
            | ScriptError::LiteralOutOfRange { span, .. }
            | ScriptError::DuplicateFunction { span, .. } => Some(*span),
        }
    }
}

impl TypeError {
    pub fn span(&self) -> Span {
        match self {
            TypeError::TypeMismatch { span, .. }
            | TypeError::OperandMismatch { span, .. }
            | TypeError::InvalidNegation { span, .. } => *span,
        }
    }
}

/// エラー情報とソースファイルIDを含むエラー
#[derive(Debug, Clone)]
pub struct DiagnosticError {
    pub error: JitError,
    pub file_id: usize,
}

impl DiagnosticError {
    pub fn new(error: JitError, file_id: usize) -> Self {
        Self { error, file_id }
    }

    /// codespan-reportingのDiagnosticに変換
    pub fn to_diagnostic(&self, source: &str) -> Diagnostic<usize> {
        let labels = match self.error.span() {
            Some(span) => {
                let start = span.byte_offset(source);
                let end = (start + 1).min(source.len());
                vec![Label::primary(self.file_id, start..end).with_message(self.label_message())]
            }
            None => vec![],
        };

        Diagnostic::error()
            .with_message(self.error.to_string())
            .with_labels(labels)
    }

    fn label_message(&self) -> &'static str {
        match &self.error {
            JitError::MalformedScript(_) => "スクリプトでは使用できません",
            JitError::Type(TypeError::TypeMismatch { .. }) => "宣言された戻り値型と一致しません",
            JitError::Type(_) => "この式で発生",
            JitError::Codegen(_) => "この式のネイティブコードを生成できません",
            JitError::MemoryMap(_) | JitError::Parse(_) | JitError::Io(_) => "",
        }
    }
}

/// Result型のエイリアス
pub type JitResult<T> = Result<T, JitError>;

impl From<syn::Error> for JitError {
    fn from(e: syn::Error) -> Self {
        let start = e.span().start();
        JitError::Parse(format!("{} at {}:{}", e, start.line, start.column + 1))
    }
}

impl From<std::io::Error> for JitError {
    fn from(e: std::io::Error) -> Self {
        JitError::Io(e.to_string())
    }
}
