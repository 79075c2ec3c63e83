//! Calling into a loaded image.

use serde::Serialize;
use std::fmt;

use super::memory::ExecutableImage;
use crate::codegen::FunctionOffset;
use crate::ir::IntType;

/// A value returned by a script function, tagged with its script type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Unit,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl Value {
    /// Script type of the value (`None` for unit)
    pub fn ty(&self) -> Option<IntType> {
        match self {
            Value::Unit => None,
            Value::I8(_) => Some(IntType::I8),
            Value::I16(_) => Some(IntType::I16),
            Value::I32(_) => Some(IntType::I32),
            Value::I64(_) => Some(IntType::I64),
            Value::U8(_) => Some(IntType::U8),
            Value::U16(_) => Some(IntType::U16),
            Value::U32(_) => Some(IntType::U32),
            Value::U64(_) => Some(IntType::U64),
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::Unit => None,
            Value::I8(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::I64(v) => Some(v.into()),
            Value::U8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::U64(v) => Some(v.into()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.as_i128(), self.ty()) {
            (Some(v), Some(ty)) => write!(f, "{}{}", v, ty),
            _ => write!(f, "()"),
        }
    }
}

macro_rules! value_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl TryFrom<Value> for $ty {
                type Error = Value;

                /// Succeeds only for a value of exactly this type
                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    I8 => i8,
    I16 => i16,
    I32 => i32,
    I64 => i64,
    U8 => u8,
    U16 => u16,
    U32 => u32,
    U64 => u64,
}

impl ExecutableImage {
    /// Run the entry function and return its result
    pub fn invoke(&self) -> Value {
        self.call(self.entry_function())
    }

    /// Run any compiled function by its path (`"physics::gravity"`)
    pub fn invoke_function(&self, path: &str) -> Option<Value> {
        self.function(path).map(|f| self.call(f))
    }

    fn call(&self, function: FunctionOffset) -> Value {
        debug_assert!(function.offset < self.code_len());
        // SAFETY: the offset lies inside the executable mapping owned by
        // `self`, which stays mapped for the whole call. The generated code
        // follows the C calling convention with no arguments and returns
        // `return_type` in the return register.
        unsafe {
            let address = self.base().add(function.offset);
            call_native(address, function.return_type)
        }
    }
}

/// # Safety
/// `address` must point at executable code of a no-argument `extern "C"`
/// function returning `return_type`.
unsafe fn call_native(address: *const u8, return_type: Option<IntType>) -> Value {
    macro_rules! call {
        ($ty:ty) => {{
            let function = unsafe { std::mem::transmute::<*const u8, extern "C" fn() -> $ty>(address) };
            function()
        }};
    }

    match return_type {
        None => {
            let function = unsafe { std::mem::transmute::<*const u8, extern "C" fn()>(address) };
            function();
            Value::Unit
        }
        Some(IntType::I8) => Value::I8(call!(i8)),
        Some(IntType::I16) => Value::I16(call!(i16)),
        Some(IntType::I32) => Value::I32(call!(i32)),
        Some(IntType::I64) => Value::I64(call!(i64)),
        Some(IntType::U8) => Value::U8(call!(u8)),
        Some(IntType::U16) => Value::U16(call!(u16)),
        Some(IntType::U32) => Value::U32(call!(u32)),
        Some(IntType::U64) => Value::U64(call!(u64)),
    }
}
