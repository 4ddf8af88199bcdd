use bigdecimal::BigDecimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use pretender_model::attr::{AttributeValue, Item};

use crate::error::{EngineError, Result};

use super::{tokenize, ExprContext, Token, TokenStream};

/// A SET operand: a literal, an attribute reference, `if_not_exists`, or
/// a single arithmetic step over two operands.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Value(AttributeValue),
    Path(String),
    IfNotExists { path: String, default: Box<Operand> },
    Plus(Box<Operand>, Box<Operand>),
    Minus(Box<Operand>, Box<Operand>),
}

/// One action of an update expression.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateAction {
    Set { path: String, operand: Operand },
    Remove { path: String },
    Add { path: String, value: AttributeValue },
    Delete { path: String, value: AttributeValue },
}

impl UpdateAction {
    fn path(&self) -> &str {
        match self {
            UpdateAction::Set { path, .. }
            | UpdateAction::Remove { path }
            | UpdateAction::Add { path, .. }
            | UpdateAction::Delete { path, .. } => path,
        }
    }
}

/// A parsed update expression.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateExpression {
    pub actions: Vec<UpdateAction>,
}

impl UpdateExpression {
    /// Apply the expression to an item in place. All operands read the
    /// state of the item as it was before the update, matching the
    /// service contract.
    pub fn apply(&self, item: &mut Item) -> Result<()> {
        let before = item.clone();
        for action in &self.actions {
            match action {
                UpdateAction::Set { path, operand } => {
                    let value = eval_operand(operand, &before)?;
                    item.insert(path.clone(), value);
                }
                UpdateAction::Remove { path } => {
                    item.remove(path);
                }
                UpdateAction::Add { path, value } => {
                    match add_values(before.get(path), value, path)? {
                        Some(merged) => item.insert(path.clone(), merged),
                        None => item.remove(path),
                    };
                }
                UpdateAction::Delete { path, value } => {
                    match delete_values(before.get(path), value, path)? {
                        Some(remaining) => item.insert(path.clone(), remaining),
                        None => item.remove(path),
                    };
                }
            }
        }
        Ok(())
    }

    /// The attribute names this expression touches, for the
    /// UPDATED_OLD/UPDATED_NEW return-value modes.
    pub fn touched_paths(&self) -> HashSet<&str> {
        self.actions.iter().map(UpdateAction::path).collect()
    }
}

/// Parse an UpdateExpression: `SET`, `REMOVE`, `ADD`, and `DELETE`
/// clauses, each holding a comma-separated action list.
pub fn parse_update(
    expr: &str,
    names: &HashMap<String, String>,
    values: &Item,
) -> Result<UpdateExpression> {
    let context = ExprContext { names, values };
    let mut stream = TokenStream::new(tokenize(expr)?);
    let mut actions = Vec::new();

    while !stream.done() {
        if stream.keyword("SET") {
            parse_clause(&mut stream, &mut actions, |stream| parse_set(&context, stream))?;
        } else if stream.keyword("REMOVE") {
            parse_clause(&mut stream, &mut actions, |stream| {
                Ok(UpdateAction::Remove {
                    path: context.path(stream)?,
                })
            })?;
        } else if stream.keyword("ADD") {
            parse_clause(&mut stream, &mut actions, |stream| {
                Ok(UpdateAction::Add {
                    path: context.path(stream)?,
                    value: context.value(stream)?,
                })
            })?;
        } else if stream.keyword("DELETE") {
            parse_clause(&mut stream, &mut actions, |stream| {
                Ok(UpdateAction::Delete {
                    path: context.path(stream)?,
                    value: context.value(stream)?,
                })
            })?;
        } else {
            return Err(EngineError::Validation(
                "update expression clauses must start with SET, REMOVE, ADD or DELETE".to_string(),
            ));
        }
    }

    if actions.is_empty() {
        return Err(EngineError::Validation("update expression is empty".to_string()));
    }
    Ok(UpdateExpression { actions })
}

fn parse_clause(
    stream: &mut TokenStream,
    actions: &mut Vec<UpdateAction>,
    mut parse_one: impl FnMut(&mut TokenStream) -> Result<UpdateAction>,
) -> Result<()> {
    actions.push(parse_one(stream)?);
    while stream.peek() == Some(&Token::Comma) {
        stream.next();
        actions.push(parse_one(stream)?);
    }
    Ok(())
}

fn parse_set(context: &ExprContext<'_>, stream: &mut TokenStream) -> Result<UpdateAction> {
    let path = context.path(stream)?;
    stream.expect(&Token::Eq, "'=' in SET action")?;
    let left = parse_simple_operand(context, stream)?;
    let operand = match stream.peek() {
        Some(Token::Plus) => {
            stream.next();
            Operand::Plus(Box::new(left), Box::new(parse_simple_operand(context, stream)?))
        }
        Some(Token::Minus) => {
            stream.next();
            Operand::Minus(Box::new(left), Box::new(parse_simple_operand(context, stream)?))
        }
        _ => left,
    };
    Ok(UpdateAction::Set { path, operand })
}

fn parse_simple_operand(context: &ExprContext<'_>, stream: &mut TokenStream) -> Result<Operand> {
    if stream.peek_keyword("if_not_exists") {
        stream.next();
        stream.expect(&Token::LParen, "'(' after if_not_exists")?;
        let path = context.path(stream)?;
        stream.expect(&Token::Comma, "',' in if_not_exists")?;
        let default = parse_simple_operand(context, stream)?;
        stream.expect(&Token::RParen, "')' closing if_not_exists")?;
        return Ok(Operand::IfNotExists {
            path,
            default: Box::new(default),
        });
    }
    match stream.peek() {
        Some(Token::ValueAlias(_)) => Ok(Operand::Value(context.value(stream)?)),
        _ => Ok(Operand::Path(context.path(stream)?)),
    }
}

fn eval_operand(operand: &Operand, item: &Item) -> Result<AttributeValue> {
    match operand {
        Operand::Value(value) => Ok(value.clone()),
        Operand::Path(path) => item.get(path).cloned().ok_or_else(|| {
            EngineError::Validation(format!(
                "the expression refers to attribute {} which does not exist in the item",
                path
            ))
        }),
        Operand::IfNotExists { path, default } => match item.get(path) {
            Some(value) => Ok(value.clone()),
            None => eval_operand(default, item),
        },
        Operand::Plus(left, right) => arithmetic(left, right, item, false),
        Operand::Minus(left, right) => arithmetic(left, right, item, true),
    }
}

fn arithmetic(left: &Operand, right: &Operand, item: &Item, negate: bool) -> Result<AttributeValue> {
    let left = as_decimal(&eval_operand(left, item)?)?;
    let right = as_decimal(&eval_operand(right, item)?)?;
    let result = if negate { left - right } else { left + right };
    Ok(AttributeValue::N(result.normalized().to_string()))
}

fn as_decimal(value: &AttributeValue) -> Result<BigDecimal> {
    match value {
        AttributeValue::N(n) => BigDecimal::from_str(n)
            .map_err(|_| EngineError::Validation(format!("{} is not a valid number", n))),
        other => Err(EngineError::Validation(format!(
            "arithmetic operands must be numbers, found {}",
            other.type_tag()
        ))),
    }
}

fn add_values(
    existing: Option<&AttributeValue>,
    value: &AttributeValue,
    path: &str,
) -> Result<Option<AttributeValue>> {
    let merged = match (existing, value) {
        (None, AttributeValue::N(_))
        | (None, AttributeValue::Ss(_))
        | (None, AttributeValue::Ns(_))
        | (None, AttributeValue::Bs(_)) => value.clone(),
        (Some(AttributeValue::N(a)), AttributeValue::N(b)) => {
            let sum = as_decimal(&AttributeValue::N(a.clone()))? + as_decimal(&AttributeValue::N(b.clone()))?;
            AttributeValue::N(sum.normalized().to_string())
        }
        (Some(AttributeValue::Ss(a)), AttributeValue::Ss(b)) => AttributeValue::Ss(union(a, b)),
        (Some(AttributeValue::Ns(a)), AttributeValue::Ns(b)) => AttributeValue::Ns(union(a, b)),
        (Some(AttributeValue::Bs(a)), AttributeValue::Bs(b)) => AttributeValue::Bs(union(a, b)),
        _ => {
            return Err(EngineError::Validation(format!(
                "ADD on {} requires a number or a set matching the existing type",
                path
            )))
        }
    };
    Ok(Some(merged))
}

fn delete_values(
    existing: Option<&AttributeValue>,
    value: &AttributeValue,
    path: &str,
) -> Result<Option<AttributeValue>> {
    let remaining = match (existing, value) {
        (None, _) => return Ok(None),
        (Some(AttributeValue::Ss(a)), AttributeValue::Ss(b)) => {
            AttributeValue::Ss(difference(a, b))
        }
        (Some(AttributeValue::Ns(a)), AttributeValue::Ns(b)) => {
            AttributeValue::Ns(difference(a, b))
        }
        (Some(AttributeValue::Bs(a)), AttributeValue::Bs(b)) => {
            AttributeValue::Bs(difference(a, b))
        }
        _ => {
            return Err(EngineError::Validation(format!(
                "DELETE on {} requires a set matching the existing type",
                path
            )))
        }
    };
    // An emptied set removes the attribute entirely.
    let empty = match &remaining {
        AttributeValue::Ss(v) => v.is_empty(),
        AttributeValue::Ns(v) => v.is_empty(),
        AttributeValue::Bs(v) => v.is_empty(),
        _ => false,
    };
    Ok(if empty { None } else { Some(remaining) })
}

fn union<T: Clone + Eq + std::hash::Hash>(existing: &[T], incoming: &[T]) -> Vec<T> {
    let mut merged = existing.to_vec();
    let seen: HashSet<&T> = existing.iter().collect();
    for member in incoming {
        if !seen.contains(member) {
            merged.push(member.clone());
        }
    }
    merged
}

fn difference<T: Clone + Eq + std::hash::Hash>(existing: &[T], removed: &[T]) -> Vec<T> {
    let removed: HashSet<&T> = removed.iter().collect();
    existing
        .iter()
        .filter(|member| !removed.contains(member))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn apply(expr: &str, vals: &Item, item: &mut Item) -> Result<()> {
        parse_update(expr, &HashMap::new(), vals)?.apply(item)
    }

    #[test]
    fn set_literals() {
        let vals = values(&[
            (":a", AttributeValue::N("150".into())),
            (":b", AttributeValue::N("25".into())),
        ]);
        let mut item = values(&[("score", AttributeValue::N("100".into()))]);
        apply("SET score = :a, bonus = :b", &vals, &mut item).unwrap();
        assert_eq!(Some(&AttributeValue::N("150".into())), item.get("score"));
        assert_eq!(Some(&AttributeValue::N("25".into())), item.get("bonus"));
    }

    #[test]
    fn set_arithmetic_reads_the_original_item() {
        let vals = values(&[(":v", AttributeValue::N("5".into()))]);
        let mut item = values(&[
            ("a", AttributeValue::N("10".into())),
            ("b", AttributeValue::N("1".into())),
        ]);
        // Both operands see the pre-update image, so b = a - :v uses a=10.
        apply("SET a = a + :v, b = a - :v", &vals, &mut item).unwrap();
        assert_eq!(Some(&AttributeValue::N("15".into())), item.get("a"));
        assert_eq!(Some(&AttributeValue::N("5".into())), item.get("b"));
    }

    #[test]
    fn arithmetic_on_missing_attribute_is_an_error() {
        let vals = values(&[(":v", AttributeValue::N("5".into()))]);
        let mut item = Item::new();
        let err = apply("SET a = a + :v", &vals, &mut item).unwrap_err();
        assert_eq!("ValidationException", err.error_name());
    }

    #[test]
    fn if_not_exists_is_the_safe_form() {
        let vals = values(&[
            (":zero", AttributeValue::N("0".into())),
            (":v", AttributeValue::N("5".into())),
        ]);
        let mut item = Item::new();
        apply("SET a = if_not_exists(a, :zero) + :v", &vals, &mut item).unwrap();
        assert_eq!(Some(&AttributeValue::N("5".into())), item.get("a"));

        let mut existing = values(&[("a", AttributeValue::N("7".into()))]);
        apply("SET a = if_not_exists(a, :zero) + :v", &vals, &mut existing).unwrap();
        assert_eq!(Some(&AttributeValue::N("12".into())), existing.get("a"));
    }

    #[test]
    fn remove_and_multiple_clauses() {
        let vals = values(&[(":n", AttributeValue::S("new".into()))]);
        let mut item = values(&[
            ("old", AttributeValue::S("x".into())),
            ("keep", AttributeValue::S("y".into())),
        ]);
        apply("SET name = :n REMOVE old", &vals, &mut item).unwrap();
        assert!(!item.contains_key("old"));
        assert!(item.contains_key("keep"));
        assert_eq!(Some(&AttributeValue::S("new".into())), item.get("name"));
    }

    #[test]
    fn add_creates_and_increments_numbers() {
        let vals = values(&[(":one", AttributeValue::N("1".into()))]);
        let mut item = Item::new();
        apply("ADD hits :one", &vals, &mut item).unwrap();
        assert_eq!(Some(&AttributeValue::N("1".into())), item.get("hits"));
        apply("ADD hits :one", &vals, &mut item).unwrap();
        assert_eq!(Some(&AttributeValue::N("2".into())), item.get("hits"));
    }

    #[test]
    fn add_unions_sets() {
        let vals = values(&[(":t", AttributeValue::Ss(vec!["b".into(), "c".into()]))]);
        let mut item = values(&[("tags", AttributeValue::Ss(vec!["a".into(), "b".into()]))]);
        apply("ADD tags :t", &vals, &mut item).unwrap();
        assert_eq!(
            Some(&AttributeValue::Ss(vec!["a".into(), "b".into(), "c".into()])),
            item.get("tags")
        );
    }

    #[test]
    fn delete_subtracts_sets_and_drops_empty_ones() {
        let vals = values(&[(":t", AttributeValue::Ss(vec!["a".into()]))]);
        let mut item = values(&[("tags", AttributeValue::Ss(vec!["a".into(), "b".into()]))]);
        apply("DELETE tags :t", &vals, &mut item).unwrap();
        assert_eq!(Some(&AttributeValue::Ss(vec!["b".into()])), item.get("tags"));

        let vals = values(&[(":t", AttributeValue::Ss(vec!["b".into()]))]);
        apply("DELETE tags :t", &vals, &mut item).unwrap();
        assert!(!item.contains_key("tags"));
    }

    #[test]
    fn add_type_mismatch_is_an_error() {
        let vals = values(&[(":one", AttributeValue::N("1".into()))]);
        let mut item = values(&[("hits", AttributeValue::S("x".into()))]);
        assert!(apply("ADD hits :one", &vals, &mut item).is_err());
    }

    #[test]
    fn decimal_arithmetic_keeps_precision() {
        let vals = values(&[(":v", AttributeValue::N("0.1".into()))]);
        let mut item = values(&[("total", AttributeValue::N("0.2".into()))]);
        apply("SET total = total + :v", &vals, &mut item).unwrap();
        assert_eq!(Some(&AttributeValue::N("0.3".into())), item.get("total"));
    }

    #[test]
    fn touched_paths_cover_every_clause() {
        let vals = values(&[
            (":a", AttributeValue::N("1".into())),
            (":t", AttributeValue::Ss(vec!["x".into()])),
        ]);
        let parsed = parse_update("SET a = :a REMOVE b ADD c :a DELETE d :t", &HashMap::new(), &vals)
            .unwrap();
        let touched = parsed.touched_paths();
        assert_eq!(4, touched.len());
        assert!(touched.contains("a") && touched.contains("d"));
    }
}
