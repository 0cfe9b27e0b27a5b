//! Positional statement arguments.

use sqlx::any::{Any, AnyArguments};
use sqlx::query::Query;
use std::fmt;

/// A single positional argument bound to `$1`, `$2`, ... (or `?` on SQLite).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A NULL carrying the column type it stands in for, so engines with
    /// strict parameter typing accept it.
    Null(ValueKind),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// The type of a [`Value`], and of a typed NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

/// Rust types that convert into a non-NULL [`Value`] of a fixed kind.
pub trait TypedValue: Into<Value> {
    const KIND: ValueKind;
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null(_) => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

macro_rules! typed_value {
    ($($ty:ty => $kind:ident),+ $(,)?) => {
        $(impl TypedValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;
        })+
    };
}

typed_value! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    &str => Text,
    String => Text,
    Vec<u8> => Bytes,
}

impl<T: TypedValue> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null(T::KIND), Into::into)
    }
}

/// Builds a `&[Value]` argument list from anything convertible into [`Value`].
///
/// ```ignore
/// client.execute(&scope, "UPDATE widgets SET name = $1 WHERE id = $2", args!["gear", 7]).await?;
/// ```
#[macro_export]
macro_rules! args {
    () => {
        &[] as &[$crate::Value]
    };
    ($($arg:expr),+ $(,)?) => {
        &[$($crate::Value::from($arg)),+] as &[$crate::Value]
    };
}

/// Renders arguments as `$1=.., $2=..` for statement tracing.
pub(crate) struct DisplayArgs<'a>(pub &'a [Value]);

impl fmt::Display for DisplayArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "${}={}", i + 1, arg)?;
        }
        Ok(())
    }
}

pub(crate) fn bind<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    args: &[Value],
) -> Query<'q, Any, AnyArguments<'q>> {
    for arg in args {
        query = match arg.clone() {
            Value::Null(ValueKind::Bool) => query.bind(None::<bool>),
            Value::Null(ValueKind::Int) => query.bind(None::<i64>),
            Value::Null(ValueKind::Float) => query.bind(None::<f64>),
            Value::Null(ValueKind::Text) => query.bind(None::<String>),
            Value::Null(ValueKind::Bytes) => query.bind(None::<Vec<u8>>),
            Value::Bool(v) => query.bind(v),
            Value::Int(v) => query.bind(v),
            Value::Float(v) => query.bind(v),
            Value::Text(v) => query.bind(v),
            Value::Bytes(v) => query.bind(v),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_render_with_one_based_positions() {
        let args = crate::args![7, "gear", None::<i64>, vec![1u8, 2, 3]];
        assert_eq!(
            DisplayArgs(args).to_string(),
            r#"$1=7, $2="gear", $3=NULL, $4=<3 bytes>"#
        );
        assert_eq!(DisplayArgs(crate::args![]).to_string(), "");
    }

    #[test]
    fn nulls_keep_the_type_of_their_column() {
        assert_eq!(Value::from(None::<i64>), Value::Null(ValueKind::Int));
        assert_eq!(Value::from(None::<bool>), Value::Null(ValueKind::Bool));
        assert_eq!(Value::from(None::<f64>), Value::Null(ValueKind::Float));
        assert_eq!(Value::from(None::<&str>), Value::Null(ValueKind::Text));
        assert_eq!(Value::from(None::<Vec<u8>>), Value::Null(ValueKind::Bytes));
        assert_eq!(Value::from(Some(3_u32)), Value::Int(3));
    }
}
