//! セマンティック解析モジュール
//!
//! このモジュールは戻り値型チェックを行い、コード生成器が受け取る
//! 型付きのモジュール表現を生成します。

mod checked;
mod type_checker;

// 公開API
pub use checked::{CheckedFunction, CheckedModule, TypedExpr, TypedExprKind};
pub use type_checker::TypeChecker;
