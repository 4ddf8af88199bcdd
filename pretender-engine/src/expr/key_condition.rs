use std::collections::HashMap;

use pretender_model::attr::{AttributeValue, Item};

use crate::error::{EngineError, Result};

use super::{tokenize, value_begins_with, Comparator, ExprContext, Token, TokenStream};

/// A parsed key condition: an exact hash-key match plus an optional
/// range test on the sort key.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyCondition {
    pub hash_key: String,
    pub hash_value: AttributeValue,
    pub sort: Option<SortCondition>,
}

/// The sort-key half of a key condition.
#[derive(Clone, Debug, PartialEq)]
pub struct SortCondition {
    pub key: String,
    pub test: SortTest,
}

/// The range test applied to the sort key.
#[derive(Clone, Debug, PartialEq)]
pub enum SortTest {
    Compare(Comparator, AttributeValue),
    Between(AttributeValue, AttributeValue),
    BeginsWith(AttributeValue),
}

impl SortTest {
    /// Whether a sort-key value falls inside this test.
    pub fn matches(&self, value: &AttributeValue) -> bool {
        match self {
            SortTest::Compare(op, operand) => op.evaluate(value, operand),
            SortTest::Between(low, high) => {
                Comparator::Ge.evaluate(value, low) && Comparator::Le.evaluate(value, high)
            }
            SortTest::BeginsWith(prefix) => value_begins_with(value, prefix),
        }
    }
}

/// Parse a KeyConditionExpression:
/// `hashKey = :v [AND sortKey op :v | sortKey BETWEEN :a AND :b |
/// begins_with(sortKey, :v)]`.
pub fn parse_key_condition(
    expr: &str,
    names: &HashMap<String, String>,
    values: &Item,
) -> Result<KeyCondition> {
    let context = ExprContext { names, values };
    let mut stream = TokenStream::new(tokenize(expr)?);

    let hash_key = context.path(&mut stream)?;
    stream.expect(&Token::Eq, "'=' after the hash key name")?;
    let hash_value = context.value(&mut stream)?;
    if !hash_value.is_scalar_key() {
        return Err(EngineError::Validation(
            "hash key condition value must be of type S, N or B".to_string(),
        ));
    }

    let sort = if stream.keyword("AND") {
        Some(parse_sort_condition(&context, &mut stream)?)
    } else {
        None
    };
    stream.expect_done()?;

    Ok(KeyCondition {
        hash_key,
        hash_value,
        sort,
    })
}

fn parse_sort_condition(context: &ExprContext<'_>, stream: &mut TokenStream) -> Result<SortCondition> {
    if stream.peek_keyword("begins_with") {
        stream.next();
        stream.expect(&Token::LParen, "'(' after begins_with")?;
        let key = context.path(stream)?;
        stream.expect(&Token::Comma, "',' in begins_with")?;
        let prefix = context.value(stream)?;
        stream.expect(&Token::RParen, "')' closing begins_with")?;
        return Ok(SortCondition {
            key,
            test: SortTest::BeginsWith(prefix),
        });
    }

    let key = context.path(stream)?;
    if stream.keyword("BETWEEN") {
        let low = context.value(stream)?;
        stream.expect_keyword("AND")?;
        let high = context.value(stream)?;
        return Ok(SortCondition {
            key,
            test: SortTest::Between(low, high),
        });
    }

    let op = stream
        .next()
        .as_ref()
        .and_then(Comparator::from_token)
        .filter(|op| *op != Comparator::Ne)
        .ok_or_else(|| {
            EngineError::Validation("sort key condition must use =, <, <=, > or >=".to_string())
        })?;
    let value = context.value(stream)?;
    Ok(SortCondition {
        key,
        test: SortTest::Compare(op, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn hash_only_condition() {
        let vals = values(&[(":u", AttributeValue::S("u1".into()))]);
        let parsed = parse_key_condition("userId = :u", &HashMap::new(), &vals).unwrap();
        assert_eq!("userId", parsed.hash_key);
        assert_eq!(AttributeValue::S("u1".into()), parsed.hash_value);
        assert!(parsed.sort.is_none());
    }

    #[test]
    fn between_condition() {
        let vals = values(&[
            (":u", AttributeValue::S("u1".into())),
            (":a", AttributeValue::S("2024-01-02".into())),
            (":b", AttributeValue::S("2024-01-04".into())),
        ]);
        let parsed =
            parse_key_condition("userId = :u AND ts BETWEEN :a AND :b", &HashMap::new(), &vals)
                .unwrap();
        let sort = parsed.sort.unwrap();
        assert_eq!("ts", sort.key);
        assert!(sort.test.matches(&AttributeValue::S("2024-01-03".into())));
        assert!(sort.test.matches(&AttributeValue::S("2024-01-02".into())));
        assert!(!sort.test.matches(&AttributeValue::S("2024-01-05".into())));
    }

    #[test]
    fn begins_with_condition_with_name_alias() {
        let mut names = HashMap::new();
        names.insert("#ts".to_string(), "ts".to_string());
        let vals = values(&[
            (":u", AttributeValue::S("u1".into())),
            (":p", AttributeValue::S("2024-".into())),
        ]);
        let parsed =
            parse_key_condition("userId = :u AND begins_with(#ts, :p)", &names, &vals).unwrap();
        let sort = parsed.sort.unwrap();
        assert_eq!("ts", sort.key);
        assert!(sort.test.matches(&AttributeValue::S("2024-01-01".into())));
        assert!(!sort.test.matches(&AttributeValue::S("2023-12-31".into())));
    }

    #[test]
    fn numeric_sort_comparison_is_numeric() {
        let vals = values(&[
            (":u", AttributeValue::S("u1".into())),
            (":n", AttributeValue::N("10".into())),
        ]);
        let parsed = parse_key_condition("id = :u AND seq < :n", &HashMap::new(), &vals).unwrap();
        let sort = parsed.sort.unwrap();
        assert!(sort.test.matches(&AttributeValue::N("9".into())));
        assert!(!sort.test.matches(&AttributeValue::N("10".into())));
    }

    #[test]
    fn hash_key_must_use_equality() {
        let vals = values(&[(":u", AttributeValue::S("u1".into()))]);
        assert!(parse_key_condition("userId > :u", &HashMap::new(), &vals).is_err());
    }

    #[test]
    fn not_equal_is_rejected_on_the_sort_key() {
        let vals = values(&[
            (":u", AttributeValue::S("u1".into())),
            (":x", AttributeValue::S("x".into())),
        ]);
        assert!(parse_key_condition("id = :u AND ts <> :x", &HashMap::new(), &vals).is_err());
    }

    #[test]
    fn unresolved_value_alias_is_rejected() {
        assert!(parse_key_condition("id = :u", &HashMap::new(), &Item::new()).is_err());
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let vals = values(&[(":u", AttributeValue::S("u1".into()))]);
        assert!(parse_key_condition("id = :u garbage", &HashMap::new(), &vals).is_err());
    }
}
