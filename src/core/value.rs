use crate::core::{DataType, Result, StoreError};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single column value as it travels between entities, statements and rows
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    /// Ordering used by predicates and ORDER BY
    ///
    /// NULL sorts after everything, integers and floats compare numerically.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        let ordering = match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            _ => match (self.numeric(), other.numeric()) {
                (Some(a), Some(b)) => total_order(a, b),
                _ => {
                    return Err(StoreError::TypeMismatch(format!(
                        "Cannot compare {} with {}",
                        self.type_name(),
                        other.type_name()
                    )));
                }
            },
        };
        Ok(ordering)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(DataType::Integer),
            Self::Float(_) => Some(DataType::Float),
            Self::Text(_) => Some(DataType::Text),
            Self::Boolean(_) => Some(DataType::Boolean),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.data_type().map_or("NULL", |t| t.sql_name())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

// NaN equals NaN and sorts after every other number
fn total_order(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        matches!(self.compare(other), Ok(Ordering::Equal))
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Integral floats hash like the matching integer
        match self {
            Self::Null => 0u8.hash(state),
            Self::Integer(_) | Self::Float(_) => match self.as_i64() {
                Some(i) => {
                    1u8.hash(state);
                    i.hash(state);
                }
                None => {
                    2u8.hash(state);
                    self.numeric().map(f64::to_bits).hash(state);
                }
            },
            Self::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Self::Boolean(b) => {
                4u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => f.write_str(s),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    i64 => Integer,
    i32 => Integer,
    f64 => Float,
    String => Text,
    &str => Text,
    bool => Boolean,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_null_sorts_last() {
        assert_eq!(Value::Null.compare(&Value::Integer(1)).unwrap(), Ordering::Greater);
        assert_eq!(Value::Integer(1).compare(&Value::Null).unwrap(), Ordering::Less);
    }

    #[test]
    fn test_mixed_numeric_equality_and_hash() {
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_ne!(Value::Integer(3), Value::Float(3.5));

        let mut set = HashSet::new();
        set.insert(Value::Integer(3));
        assert!(set.contains(&Value::Float(3.0)));
        assert!(!set.contains(&Value::Text("3".into())));
    }

    #[test]
    fn test_incompatible_comparison_fails() {
        let err = Value::Text("a".into()).compare(&Value::Integer(1)).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch(_)));
        assert_ne!(Value::Text("1".into()), Value::Integer(1));
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(Value::from(7i32).data_type(), Some(DataType::Integer));
    }
}
