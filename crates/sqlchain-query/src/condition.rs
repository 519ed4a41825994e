//! The shapes a condition can take.

use crate::expr::{Arg, Expr, IntoArgs};
use sqlchain_core::{Model, Record, Value};
use std::collections::{BTreeMap, HashMap};

/// A condition before it is rendered against a table.
///
/// Each shape renders differently: text is used as written, primary keys
/// become `pk = ?` or `pk IN (?)`, maps and records become equality
/// predicates over their non-blank columns.
#[derive(Debug)]
pub enum Condition {
    /// Raw SQL text with `?` placeholders.
    Text(String),
    /// A single primary key value.
    PrimaryKey(Value),
    /// A set of primary key values.
    PrimaryKeys(Vec<Value>),
    /// Column/value pairs, sorted by column.
    Map(Vec<(String, Value)>),
    /// A model instance whose non-blank fields are matched.
    Record(Box<dyn Record>),
    /// A prebuilt expression, typically a subquery.
    Expr(Expr),
}

impl Condition {
    /// A condition matching the non-blank fields of `model`.
    pub fn record<M: Model>(model: &M) -> Self {
        Condition::Record(Box::new(model.clone()))
    }

    /// A map condition from any iterator of column/value pairs.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut pairs: Vec<(String, Value)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Condition::Map(pairs)
    }

    /// Blank text, an empty key set or an empty map adds nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Text(s) => s.trim().is_empty(),
            Condition::PrimaryKeys(keys) => keys.is_empty(),
            Condition::Map(pairs) => pairs.is_empty(),
            Condition::PrimaryKey(_) | Condition::Record(_) | Condition::Expr(_) => false,
        }
    }
}

impl Clone for Condition {
    fn clone(&self) -> Self {
        match self {
            Condition::Text(s) => Condition::Text(s.clone()),
            Condition::PrimaryKey(v) => Condition::PrimaryKey(v.clone()),
            Condition::PrimaryKeys(v) => Condition::PrimaryKeys(v.clone()),
            Condition::Map(m) => Condition::Map(m.clone()),
            Condition::Record(r) => Condition::Record(r.clone_record()),
            Condition::Expr(e) => Condition::Expr(e.clone()),
        }
    }
}

impl From<&str> for Condition {
    fn from(s: &str) -> Self {
        Condition::Text(s.to_string())
    }
}

impl From<String> for Condition {
    fn from(s: String) -> Self {
        Condition::Text(s)
    }
}

impl From<&String> for Condition {
    fn from(s: &String) -> Self {
        Condition::Text(s.clone())
    }
}

impl From<Expr> for Condition {
    fn from(e: Expr) -> Self {
        Condition::Expr(e)
    }
}

impl From<Value> for Condition {
    fn from(v: Value) -> Self {
        Condition::PrimaryKey(v)
    }
}

impl From<Vec<Value>> for Condition {
    fn from(v: Vec<Value>) -> Self {
        Condition::PrimaryKeys(v)
    }
}

macro_rules! impl_key_condition {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Condition {
                fn from(v: $ty) -> Self {
                    Condition::PrimaryKey(Value::from(v))
                }
            }

            impl From<Vec<$ty>> for Condition {
                fn from(v: Vec<$ty>) -> Self {
                    Condition::PrimaryKeys(v.into_iter().map(Value::from).collect())
                }
            }
        )*
    };
}

impl_key_condition!(i32, i64, u32, u64);

impl<V: Into<Value>> From<BTreeMap<String, V>> for Condition {
    fn from(m: BTreeMap<String, V>) -> Self {
        Condition::map(m)
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for Condition {
    fn from(m: HashMap<String, V>) -> Self {
        Condition::map(m)
    }
}

impl<V: Into<Value>> From<Vec<(&str, V)>> for Condition {
    fn from(m: Vec<(&str, V)>) -> Self {
        Condition::map(m)
    }
}

/// A condition with its arguments, as stored in a search list.
#[derive(Debug, Clone)]
pub struct Clause {
    pub condition: Condition,
    pub args: Vec<Arg>,
}

impl Clause {
    pub fn new(condition: impl Into<Condition>, args: impl IntoArgs) -> Self {
        Self {
            condition: condition.into(),
            args: args.into_args(),
        }
    }
}
