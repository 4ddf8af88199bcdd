use std::collections::HashMap;

use pretender_model::attr::{AttributeValue, Item};

use crate::error::{EngineError, Result};

use super::{tokenize, value_begins_with, Comparator, ExprContext, Token, TokenStream};

/// One conjunct of a condition expression.
#[derive(Clone, Debug, PartialEq)]
pub enum ConditionTerm {
    Exists(String),
    NotExists(String),
    BeginsWith { path: String, prefix: AttributeValue },
    Compare {
        path: String,
        op: Comparator,
        value: AttributeValue,
    },
}

impl ConditionTerm {
    fn evaluate(&self, item: Option<&Item>) -> bool {
        match self {
            ConditionTerm::Exists(path) => item.is_some_and(|i| i.contains_key(path)),
            ConditionTerm::NotExists(path) => !item.is_some_and(|i| i.contains_key(path)),
            ConditionTerm::BeginsWith { path, prefix } => item
                .and_then(|i| i.get(path))
                .is_some_and(|value| value_begins_with(value, prefix)),
            ConditionTerm::Compare { path, op, value } => item
                .and_then(|i| i.get(path))
                .is_some_and(|attr| op.evaluate(attr, value)),
        }
    }
}

/// A conjunction of condition terms: existence checks, comparators, and
/// `begins_with`, joined by `AND`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionExpression {
    terms: Vec<ConditionTerm>,
}

impl ConditionExpression {
    /// Evaluate against the current item, or `None` when the item does
    /// not exist.
    pub fn evaluate(&self, item: Option<&Item>) -> bool {
        self.terms.iter().all(|term| term.evaluate(item))
    }
}

/// Parse a ConditionExpression (also used for filter expressions).
pub fn parse_condition(
    expr: &str,
    names: &HashMap<String, String>,
    values: &Item,
) -> Result<ConditionExpression> {
    let context = ExprContext { names, values };
    let mut stream = TokenStream::new(tokenize(expr)?);
    let mut terms = vec![parse_term(&context, &mut stream)?];
    while stream.keyword("AND") {
        terms.push(parse_term(&context, &mut stream)?);
    }
    stream.expect_done()?;
    Ok(ConditionExpression { terms })
}

fn parse_term(context: &ExprContext<'_>, stream: &mut TokenStream) -> Result<ConditionTerm> {
    for (function, exists) in [("attribute_exists", true), ("attribute_not_exists", false)] {
        if stream.peek_keyword(function) {
            stream.next();
            stream.expect(&Token::LParen, "'(' after function name")?;
            let path = context.path(stream)?;
            stream.expect(&Token::RParen, "')' closing function")?;
            return Ok(if exists {
                ConditionTerm::Exists(path)
            } else {
                ConditionTerm::NotExists(path)
            });
        }
    }

    if stream.peek_keyword("begins_with") {
        stream.next();
        stream.expect(&Token::LParen, "'(' after begins_with")?;
        let path = context.path(stream)?;
        stream.expect(&Token::Comma, "',' in begins_with")?;
        let prefix = context.value(stream)?;
        stream.expect(&Token::RParen, "')' closing begins_with")?;
        return Ok(ConditionTerm::BeginsWith { path, prefix });
    }

    let path = context.path(stream)?;
    let op = stream
        .next()
        .as_ref()
        .and_then(Comparator::from_token)
        .ok_or_else(|| EngineError::Validation("expected a comparison operator".to_string()))?;
    let value = context.value(stream)?;
    Ok(ConditionTerm::Compare { path, op, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn attribute_not_exists_passes_on_missing_item() {
        let parsed =
            parse_condition("attribute_not_exists(id)", &HashMap::new(), &Item::new()).unwrap();
        assert!(parsed.evaluate(None));
        assert!(!parsed.evaluate(Some(&item(&[("id", AttributeValue::S("u1".into()))]))));
    }

    #[test]
    fn conjunction_requires_every_term() {
        let vals = item(&[(":min", AttributeValue::N("18".into()))]);
        let parsed =
            parse_condition("attribute_exists(id) AND age >= :min", &HashMap::new(), &vals).unwrap();

        let adult = item(&[
            ("id", AttributeValue::S("u1".into())),
            ("age", AttributeValue::N("30".into())),
        ]);
        let minor = item(&[
            ("id", AttributeValue::S("u2".into())),
            ("age", AttributeValue::N("9".into())),
        ]);
        assert!(parsed.evaluate(Some(&adult)));
        assert!(!parsed.evaluate(Some(&minor)));
    }

    #[test]
    fn comparisons_on_missing_attributes_fail_quietly() {
        let vals = item(&[(":v", AttributeValue::N("1".into()))]);
        let parsed = parse_condition("count = :v", &HashMap::new(), &vals).unwrap();
        assert!(!parsed.evaluate(Some(&item(&[]))));
        assert!(!parsed.evaluate(None));
    }

    #[test]
    fn begins_with_filter() {
        let vals = item(&[(":p", AttributeValue::S("2024-".into()))]);
        let parsed = parse_condition("begins_with(ts, :p)", &HashMap::new(), &vals).unwrap();
        assert!(parsed.evaluate(Some(&item(&[("ts", AttributeValue::S("2024-01-01".into()))]))));
        assert!(!parsed.evaluate(Some(&item(&[("ts", AttributeValue::S("2023-12-31".into()))]))));
    }
}
