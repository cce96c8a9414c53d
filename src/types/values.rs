//! Runtime value types

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::script_block::ScriptBlock;

/// Runtime value type
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Val {
    #[default]
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Val>),
    Map(IndexMap<String, Val>),
    Block(ScriptBlock),
}

impl Val {
    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::List(items) => !items.is_empty(),
            Val::Map(_) | Val::Block(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Val::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Num(_) => "number",
            Val::Str(_) => "string",
            Val::List(_) => "list",
            Val::Map(_) => "map",
            Val::Block(_) => "scriptblock",
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Val::Num(n) => Some(*n),
            Val::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Val::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Collapse a collected output stream the way a call expression yields it:
    /// nothing is null, one item is itself, several items become a list.
    pub fn from_output(mut items: Vec<Val>) -> Val {
        match items.len() {
            0 => Val::Null,
            1 => items.pop().unwrap_or_default(),
            _ => Val::List(items),
        }
    }

    /// Iterate a value the way `foreach` does: lists yield elements, null yields
    /// nothing, anything else yields itself once.
    pub fn into_items(self) -> Vec<Val> {
        match self {
            Val::List(items) => items,
            Val::Null => Vec::new(),
            other => vec![other],
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Val::Null => JsonValue::Null,
            Val::Bool(b) => JsonValue::Bool(*b),
            Val::Num(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Val::Str(s) => JsonValue::String(s.clone()),
            Val::List(items) => JsonValue::Array(items.iter().map(Val::to_json).collect()),
            Val::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Val::Block(block) => JsonValue::String(format!("{{{}}}", block.code().text())),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => Ok(()),
            Val::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Val::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Val::Str(s) => write!(f, "{}", s),
            Val::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(" "))
            }
            Val::Map(map) => {
                let parts: Vec<String> =
                    map.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
                write!(f, "@{{{}}}", parts.join("; "))
            }
            Val::Block(block) => write!(f, "{}", block.code().text()),
        }
    }
}

impl From<bool> for Val {
    fn from(v: bool) -> Self {
        Val::Bool(v)
    }
}

impl From<f64> for Val {
    fn from(v: f64) -> Self {
        Val::Num(v)
    }
}

impl From<i32> for Val {
    fn from(v: i32) -> Self {
        Val::Num(v as f64)
    }
}

impl From<&str> for Val {
    fn from(v: &str) -> Self {
        Val::Str(v.to_string())
    }
}

impl From<String> for Val {
    fn from(v: String) -> Self {
        Val::Str(v)
    }
}

impl From<Vec<Val>> for Val {
    fn from(v: Vec<Val>) -> Self {
        Val::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_output_collapses_streams() {
        assert_eq!(Val::from_output(vec![]), Val::Null);
        assert_eq!(Val::from_output(vec![Val::Num(1.0)]), Val::Num(1.0));
        assert_eq!(
            Val::from_output(vec![Val::Num(1.0), Val::Num(2.0)]),
            Val::List(vec![Val::Num(1.0), Val::Num(2.0)])
        );
    }

    #[test]
    fn test_display_whole_numbers_without_fraction() {
        assert_eq!(Val::Num(3.0).to_string(), "3");
        assert_eq!(Val::Num(2.5).to_string(), "2.5");
        assert_eq!(Val::Bool(true).to_string(), "True");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Val::Null.is_truthy());
        assert!(!Val::Num(0.0).is_truthy());
        assert!(Val::Str("x".into()).is_truthy());
        assert!(!Val::List(vec![]).is_truthy());
    }
}
