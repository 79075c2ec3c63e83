//! 戻り値型チェック機能
//!
//! 各関数の最後の式の静的な型を推論し、宣言された戻り値型と比較します。
//! すべての関数を検査し終えるまでコード生成は始まりません。

use crate::error::TypeError;
use crate::ir::{return_type_name, BinaryOp, Expression, Function, IntType, Module, UnaryOp};

use super::checked::{CheckedFunction, CheckedModule, TypedExpr, TypedExprKind};

/// 型注釈のない整数リテラルの既定候補（Rustと同じくi32から）
const LITERAL_FALLBACK: [IntType; 3] = [IntType::I32, IntType::I64, IntType::U64];

/// 型チェッカー
#[derive(Debug, Default)]
pub struct TypeChecker;

impl TypeChecker {
    pub fn new() -> Self {
        Self
    }

    /// モジュール全体を検査し、最初のエラーを返す
    pub fn check(&self, module: &Module) -> Result<CheckedModule, TypeError> {
        self.check_all(module)
            .map_err(|mut errors| errors.swap_remove(0))
    }

    /// モジュール全体を検査し、すべてのエラーを収集
    pub fn check_all(&self, module: &Module) -> Result<CheckedModule, Vec<TypeError>> {
        let mut functions = Vec::new();
        let mut errors = Vec::new();

        for function in module.all_functions() {
            match self.check_function(function) {
                Ok(checked) => functions.push(checked),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            log::debug!("type checked {} functions", functions.len());
            Ok(CheckedModule::new(functions))
        } else {
            Err(errors)
        }
    }

    /// 関数を検査
    pub fn check_function(&self, function: &Function) -> Result<CheckedFunction, TypeError> {
        let scope = FunctionScope {
            function: &function.path,
        };
        // `;`で終わる本体の最後の式は値にならない
        let last = function
            .body
            .len()
            .checked_sub(1)
            .filter(|_| function.tail);

        let mut body = Vec::with_capacity(function.body.len());
        for (index, expr) in function.body.iter().enumerate() {
            // 戻り値型の期待は最後の式にだけ伝播させる
            let expected = if Some(index) == last {
                function.return_type
            } else {
                None
            };
            body.push(scope.infer(expr, expected)?);
        }

        if let Some(declared) = function.return_type {
            match body.last().filter(|_| function.tail) {
                Some(value) if value.ty == declared => {}
                Some(value) => {
                    return Err(TypeError::TypeMismatch {
                        function: function.path.clone(),
                        declared: declared.to_string(),
                        inferred: value.ty.to_string(),
                        span: value.span,
                    })
                }
                None => {
                    return Err(TypeError::TypeMismatch {
                        function: function.path.clone(),
                        declared: declared.to_string(),
                        inferred: return_type_name(None),
                        span: body.last().map_or(function.span, |e| e.span),
                    })
                }
            }
        }

        Ok(CheckedFunction {
            path: function.path.clone(),
            return_type: function.return_type,
            body,
            is_entry: function.is_entry,
            span: function.span,
        })
    }
}

/// 1関数分の推論コンテキスト
struct FunctionScope<'a> {
    function: &'a str,
}

impl FunctionScope<'_> {
    /// 期待される型のもとで式の型を推論
    fn infer(&self, expr: &Expression, expected: Option<IntType>) -> Result<TypedExpr, TypeError> {
        match expr {
            Expression::Literal(lit) => Ok(TypedExpr {
                kind: TypedExprKind::Literal(lit.value),
                ty: lit
                    .suffix
                    .unwrap_or_else(|| literal_type(lit.value, expected)),
                span: lit.span,
            }),
            Expression::Unary { op, operand, span } => {
                let operand = self.infer(operand, expected)?;
                if *op == UnaryOp::Neg && !operand.ty.is_signed() {
                    return Err(TypeError::InvalidNegation {
                        function: self.function.to_string(),
                        ty: operand.ty.to_string(),
                        span: *span,
                    });
                }
                Ok(TypedExpr {
                    ty: operand.ty,
                    kind: TypedExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    span: *span,
                })
            }
            Expression::Binary { op, lhs, rhs, span } => {
                let (lhs, rhs) = if op.is_shift() {
                    // シフト量の型は左辺と独立
                    (self.infer(lhs, expected)?, self.infer(rhs, None)?)
                } else {
                    self.infer_operands(*op, lhs, rhs, expected)?
                };
                Ok(TypedExpr {
                    ty: lhs.ty,
                    kind: TypedExprKind::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    span: *span,
                })
            }
            Expression::Cast { expr, target, span } => Ok(TypedExpr {
                kind: TypedExprKind::Cast(Box::new(self.infer(expr, None)?)),
                ty: *target,
                span: *span,
            }),
        }
    }

    /// 二項演算子の両辺を同じ型に揃える
    fn infer_operands(
        &self,
        op: BinaryOp,
        lhs: &Expression,
        rhs: &Expression,
        expected: Option<IntType>,
    ) -> Result<(TypedExpr, TypedExpr), TypeError> {
        let left = self.infer(lhs, expected)?;
        let right = self.infer(rhs, Some(left.ty))?;
        if left.ty == right.ty {
            return Ok((left, right));
        }

        // `1 + 2u64` のように右辺だけが型を決めている場合
        let left = self.infer(lhs, Some(right.ty))?;
        if left.ty == right.ty {
            Ok((left, right))
        } else {
            Err(TypeError::OperandMismatch {
                function: self.function.to_string(),
                op: op.to_string(),
                lhs: left.ty.to_string(),
                rhs: right.ty.to_string(),
                span: lhs.span(),
            })
        }
    }
}

/// 型注釈のない整数リテラルの型
fn literal_type(value: i128, expected: Option<IntType>) -> IntType {
    match expected {
        Some(ty) if ty.contains(value) => ty,
        _ => LITERAL_FALLBACK
            .into_iter()
            .find(|ty| ty.contains(value))
            .unwrap_or(IntType::I64),
    }
}
