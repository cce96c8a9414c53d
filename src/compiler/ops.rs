//! Operator semantics shared by both tiers

use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::errors::ScriptError;
use crate::types::{BinaryOp, Span, UnaryOp, Val};

/// Apply a non-short-circuit binary operator
pub fn binary(op: BinaryOp, left: Val, right: Val, span: Span) -> Result<Val, ScriptError> {
    match op {
        BinaryOp::Add => add(left, right, span),
        BinaryOp::Sub | BinaryOp::Div | BinaryOp::Mod => {
            let (l, r) = numbers(op, &left, &right, span)?;
            match op {
                BinaryOp::Sub => Ok(Val::Num(l - r)),
                _ if r == 0.0 => Err(ScriptError::runtime_at("Attempted to divide by zero", span)),
                BinaryOp::Div => Ok(Val::Num(l / r)),
                _ => Ok(Val::Num(l % r)),
            }
        }
        BinaryOp::Mul => match (&left, &right) {
            (Val::Str(s), Val::Num(n)) if *n >= 0.0 => Ok(Val::Str(s.repeat(*n as usize))),
            _ => {
                let (l, r) = numbers(op, &left, &right, span)?;
                Ok(Val::Num(l * r))
            }
        },
        BinaryOp::Eq => Ok(Val::Bool(equals(&left, &right))),
        BinaryOp::Ne => Ok(Val::Bool(!equals(&left, &right))),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            let ordering = compare(&left, &right).ok_or_else(|| {
                ScriptError::runtime_at(
                    format!(
                        "Cannot compare {} with {}",
                        left.type_name(),
                        right.type_name()
                    ),
                    span,
                )
            })?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Lte => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Val::Bool(result))
        }
        BinaryOp::And => Ok(Val::Bool(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(Val::Bool(left.is_truthy() || right.is_truthy())),
    }
}

pub fn unary(op: UnaryOp, operand: Val, span: Span) -> Result<Val, ScriptError> {
    match op {
        UnaryOp::Not => Ok(Val::Bool(!operand.is_truthy())),
        UnaryOp::Neg => match operand.as_num() {
            Some(n) => Ok(Val::Num(-n)),
            None => Err(ScriptError::runtime_at(
                format!("Cannot negate a value of type {}", operand.type_name()),
                span,
            )),
        },
    }
}

fn add(left: Val, right: Val, span: Span) -> Result<Val, ScriptError> {
    match (left, right) {
        (Val::Num(l), Val::Num(r)) => Ok(Val::Num(l + r)),
        (Val::Str(l), r) => Ok(Val::Str(format!("{}{}", l, r))),
        (Val::List(mut l), Val::List(r)) => {
            l.extend(r);
            Ok(Val::List(l))
        }
        (Val::List(mut l), r) => {
            l.push(r);
            Ok(Val::List(l))
        }
        (Val::Map(mut l), Val::Map(r)) => {
            l.extend(r);
            Ok(Val::Map(l))
        }
        (Val::Null, r) => Ok(r),
        (l, r) => {
            let (a, b) = numbers(BinaryOp::Add, &l, &r, span)?;
            Ok(Val::Num(a + b))
        }
    }
}

fn numbers(op: BinaryOp, left: &Val, right: &Val, span: Span) -> Result<(f64, f64), ScriptError> {
    let l = if left.is_null() { Some(0.0) } else { left.as_num() };
    let r = if right.is_null() { Some(0.0) } else { right.as_num() };
    match (l, r) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(ScriptError::runtime_at(
            format!(
                "Operator {:?} is not defined for {} and {}",
                op,
                left.type_name(),
                right.type_name()
            ),
            span,
        )),
    }
}

/// Equality with number/string coercion and case-insensitive strings
pub fn equals(left: &Val, right: &Val) -> bool {
    match (left, right) {
        (Val::Str(l), Val::Str(r)) => l.eq_ignore_ascii_case(r),
        (Val::Num(l), other) | (other, Val::Num(l)) if !other.is_null() => {
            other.as_num().is_some_and(|r| *l == r)
        }
        _ => left == right,
    }
}

fn compare(left: &Val, right: &Val) -> Option<Ordering> {
    match (left, right) {
        (Val::Str(l), Val::Str(r)) => Some(l.to_lowercase().cmp(&r.to_lowercase())),
        _ => {
            let l = left.as_num()?;
            let r = right.as_num()?;
            l.partial_cmp(&r)
        }
    }
}

/// `obj.prop`
pub fn member(object: &Val, property: &str) -> Val {
    match object {
        Val::Map(map) => map
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(property))
            .map(|(_, v)| v.clone())
            .unwrap_or_default(),
        Val::List(items) if is_count(property) => Val::Num(items.len() as f64),
        Val::Str(s) if is_count(property) => Val::Num(s.chars().count() as f64),
        Val::Null if is_count(property) => Val::Num(0.0),
        _ => Val::Null,
    }
}

fn is_count(property: &str) -> bool {
    property.eq_ignore_ascii_case("count") || property.eq_ignore_ascii_case("length")
}

/// `obj[index]`; negative list indices count from the end
pub fn index(object: &Val, index: &Val, span: Span) -> Result<Val, ScriptError> {
    match (object, index) {
        (Val::List(items), idx) => Ok(list_position(items.len(), idx, span)?
            .and_then(|i| items.get(i).cloned())
            .unwrap_or_default()),
        (Val::Map(_), Val::Str(key)) => Ok(member(object, key)),
        (Val::Str(s), idx) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(list_position(chars.len(), idx, span)?
                .and_then(|i| chars.get(i))
                .map(|c| Val::Str(c.to_string()))
                .unwrap_or_default())
        }
        (Val::Null, _) => Ok(Val::Null),
        (other, _) => Err(ScriptError::runtime_at(
            format!("Cannot index into a value of type {}", other.type_name()),
            span,
        )),
    }
}

fn list_position(len: usize, index: &Val, span: Span) -> Result<Option<usize>, ScriptError> {
    let n = index.as_num().ok_or_else(|| {
        ScriptError::runtime_at(
            format!("Index must be a number, got {}", index.type_name()),
            span,
        )
    })?;
    let i = n as i64;
    let resolved = if i < 0 { len as i64 + i } else { i };
    Ok((resolved >= 0 && (resolved as usize) < len).then_some(resolved as usize))
}

/// Write `value` at the end of `path` inside `target`, creating maps for
/// null intermediate values.
pub fn assign_path(target: &mut Val, path: &[Val], value: Val, span: Span) -> Result<(), ScriptError> {
    let Some((key, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };

    if target.is_null() {
        *target = Val::Map(IndexMap::new());
    }

    match (target, key) {
        (Val::Map(map), Val::Str(key)) => {
            let existing = map
                .keys()
                .find(|k| k.eq_ignore_ascii_case(key))
                .cloned()
                .unwrap_or_else(|| key.clone());
            let slot = map.entry(existing).or_default();
            assign_path(slot, rest, value, span)
        }
        (Val::List(items), idx) => {
            let len = items.len();
            match list_position(len, idx, span)? {
                Some(i) => assign_path(&mut items[i], rest, value, span),
                None => Err(ScriptError::runtime_at(
                    format!("Index {} is out of range for a list of {}", idx, len),
                    span,
                )),
            }
        }
        (other, key) => Err(ScriptError::runtime_at(
            format!(
                "Cannot assign member '{}' on a value of type {}",
                key,
                other.type_name()
            ),
            span,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Val {
        Val::Num(n)
    }

    #[test]
    fn test_arithmetic() {
        let span = Span::default();
        assert_eq!(binary(BinaryOp::Add, num(1.0), num(2.0), span).unwrap(), num(3.0));
        assert_eq!(
            binary(BinaryOp::Add, Val::from("n="), num(2.0), span).unwrap(),
            Val::from("n=2")
        );
        assert_eq!(binary(BinaryOp::Mod, num(7.0), num(4.0), span).unwrap(), num(3.0));
        assert!(binary(BinaryOp::Div, num(1.0), num(0.0), span).is_err());
    }

    #[test]
    fn test_equality_coerces() {
        assert!(equals(&num(3.0), &Val::from("3")));
        assert!(equals(&Val::from("ABC"), &Val::from("abc")));
        assert!(!equals(&num(0.0), &Val::Null));
    }

    #[test]
    fn test_index_and_member() {
        let list = Val::List(vec![num(1.0), num(2.0), num(3.0)]);
        assert_eq!(index(&list, &num(-1.0), Span::default()).unwrap(), num(3.0));
        assert_eq!(index(&list, &num(9.0), Span::default()).unwrap(), Val::Null);
        assert_eq!(member(&list, "Count"), num(3.0));
    }

    #[test]
    fn test_assign_path_creates_maps() {
        let mut target = Val::Null;
        assign_path(
            &mut target,
            &[Val::from("a"), Val::from("b")],
            num(1.0),
            Span::default(),
        )
        .unwrap();

        assert_eq!(member(&member(&target, "a"), "B"), num(1.0));
    }

    #[test]
    fn test_assign_path_rejects_out_of_range() {
        let mut target = Val::List(vec![num(1.0)]);
        assert!(assign_path(&mut target, &[num(4.0)], num(2.0), Span::default()).is_err());
    }
}
