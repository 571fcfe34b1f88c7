/*******************************************************************************
* Copyright 2020 Stefan Majewsky <majewsky@gmx.net>
* SPDX-License-Identifier: Apache-2.0
* Refer to the file "LICENSE" for details.
*******************************************************************************/

use crate::error::Error;

/// A single D-Bus body element.
///
/// Stands in for the out-of-scope wire codec's type system (spec.md §6's
/// "Message codec" collaborator): enough variants to exercise method calls,
/// replies, signals and the inline Peer/Introspectable handlers without
/// pulling in a full marshalling crate.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    Array(Vec<Value>),
    Struct(Vec<Value>),
    Variant(Box<Value>),
}

impl Value {
    /// A one-letter-per-variant tag, used only for diagnostics (e.g.
    /// `SignatureMismatch`'s `got` field); it is not a real D-Bus type
    /// signature, which is the wire codec's concern.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Bool(_) => "b",
            Value::I16(_) => "n",
            Value::U16(_) => "q",
            Value::I32(_) => "i",
            Value::U32(_) => "u",
            Value::I64(_) => "x",
            Value::U64(_) => "t",
            Value::F64(_) => "d",
            Value::Str(_) => "s",
            Value::ObjectPath(_) => "o",
            Value::Signature(_) => "g",
            Value::Array(_) => "a",
            Value::Struct(_) => "r",
            Value::Variant(_) => "v",
        }
    }

    /// The first body element interpreted as a string, or `""` — exactly the
    /// fallback rule spec.md §4.3 gives for decoding an `Error` reply's body.
    pub fn as_str_or_empty(&self) -> &str {
        match self {
            Value::Str(s) => s,
            _ => "",
        }
    }
}

/// A type that can be encoded into a [`Value`] for an outgoing message body.
///
/// Mirrors the teacher's `EncodeArgument` trait (`common/core/
/// encode_argument.rs`): one method, blanket-implemented for the primitives a
/// D-Bus body actually carries.
pub trait ArgValue {
    fn into_value(self) -> Value;
}

macro_rules! impl_arg_value {
    ($t:ty, $variant:ident) => {
        impl ArgValue for $t {
            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

impl_arg_value!(bool, Bool);
impl_arg_value!(i16, I16);
impl_arg_value!(u16, U16);
impl_arg_value!(i32, I32);
impl_arg_value!(u32, U32);
impl_arg_value!(i64, I64);
impl_arg_value!(u64, U64);
impl_arg_value!(f64, F64);

impl ArgValue for String {
    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl ArgValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl<T: ArgValue> ArgValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(ArgValue::into_value).collect())
    }
}

/// The inverse of [`ArgValue`]: decode a [`Value`] into a Rust type, the
/// mechanism behind `method_call`'s generic reply-body decode (spec.md
/// §4.2). Mirrors the teacher's `DecodeArgument` trait.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, Error>;
}

macro_rules! impl_from_value {
    ($t:ty, $variant:ident) => {
        impl FromValue for $t {
            fn from_value(value: &Value) -> Result<Self, Error> {
                match value {
                    Value::$variant(v) => Ok(v.clone()),
                    other => Err(Error::SignatureMismatch {
                        expected: stringify!($variant).to_string(),
                        got: other.type_tag().to_string(),
                    }),
                }
            }
        }
    };
}

impl_from_value!(bool, Bool);
impl_from_value!(i16, I16);
impl_from_value!(u16, U16);
impl_from_value!(i32, I32);
impl_from_value!(u32, U32);
impl_from_value!(i64, I64);
impl_from_value!(u64, U64);
impl_from_value!(f64, F64);
impl_from_value!(String, Str);

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            other => Err(Error::SignatureMismatch {
                expected: "a".to_string(),
                got: other.type_tag().to_string(),
            }),
        }
    }
}
