//! Predicate compiler and evaluator for `find`, `update` and `delete`.
//!
//! Callers describe conditions as `field__operator` keys paired with an
//! operand, e.g. `("age__gt", 21)`. Each pair is compiled once, at the API
//! boundary, into a [`Predicate`]; evaluation then works on structured data
//! only. Multiple predicates combine with AND, evaluated left to right with
//! short-circuiting.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, QueryError};
use crate::record::Record;
use crate::value::Value;

/// Separator between the field path and the operator in a query key.
pub const OPERATOR_SEPARATOR: &str = "__";

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Contains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Regex,
}

impl Operator {
    /// Every operator, in the order they are documented.
    pub const ALL: [Operator; 12] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Contains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::Regex,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Contains => "contains",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Nin => "nin",
            Operator::Regex => "regex",
        }
    }

    /// Parse an operator suffix (`"gt"`, `"startswith"`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == s)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled `(field path, operator, operand)` triple.
///
/// Construction checks the operand shape, so a `Predicate` that exists is
/// always well-formed: `in`/`nin` hold a list, `startswith`/`endswith` hold
/// text, ordering operators hold a number or text, and `regex` holds a
/// pattern that compiled.
#[derive(Debug, Clone)]
pub struct Predicate {
    path: String,
    op: Operator,
    operand: Value,
    /// Compiled `regex` operand.
    pattern: Option<Regex>,
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.op == other.op && self.operand == other.operand
    }
}

impl Predicate {
    /// Compile a query key such as `"age__gte"` or `"name"` (implicit `eq`).
    ///
    /// The key is split at its last `__`. A field whose own name contains
    /// `__` must spell out the operator: `"a__b__eq"`. The field part may be
    /// a dot-separated path into nested maps.
    pub fn compile(key: &str, operand: impl Into<Value>) -> Result<Self, QueryError> {
        let (path, op) = match key.rsplit_once(OPERATOR_SEPARATOR) {
            Some((path, suffix)) => {
                let op = Operator::parse(suffix).ok_or_else(|| QueryError::UnknownOperator {
                    key: key.to_string(),
                    operator: suffix.to_string(),
                })?;
                (path, op)
            }
            None => (key, Operator::Eq),
        };
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(QueryError::EmptyField(key.to_string()));
        }
        Self::new(path, op, operand)
    }

    /// Build a predicate from already separated parts.
    pub fn new(
        path: impl Into<String>,
        op: Operator,
        operand: impl Into<Value>,
    ) -> Result<Self, QueryError> {
        let operand = operand.into();
        let expected = match op {
            Operator::In | Operator::Nin if !matches!(operand, Value::List(_)) => Some("a list"),
            Operator::StartsWith | Operator::EndsWith | Operator::Regex
                if !matches!(operand, Value::Text(_)) =>
            {
                Some("a text")
            }
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
                if !(operand.is_number() || matches!(operand, Value::Text(_))) =>
            {
                Some("a number or text")
            }
            _ => None,
        };
        if let Some(expected) = expected {
            return Err(QueryError::InvalidOperand {
                operator: op,
                expected,
                actual: operand.kind(),
            });
        }
        if !operand.is_finite() {
            return Err(QueryError::InvalidOperand {
                operator: op,
                expected: "a finite",
                actual: operand.kind(),
            });
        }
        let pattern = match (op, &operand) {
            (Operator::Regex, Value::Text(source)) => {
                Some(Regex::new(source).map_err(|_| QueryError::InvalidOperand {
                    operator: op,
                    expected: "a valid regular expression",
                    actual: operand.kind(),
                })?)
            }
            _ => None,
        };
        Ok(Self {
            path: path.into(),
            op,
            operand,
            pattern,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn operand(&self) -> &Value {
        &self.operand
    }

    /// Evaluate against a record.
    ///
    /// A missing field reads as `Null`. `Null` never matches `contains`,
    /// `startswith`, `endswith`, `regex` or the ordering operators, and is
    /// not an error there. Any other kind an operator cannot handle is an
    /// [`EvalError`].
    pub fn evaluate(&self, record: &Record) -> Result<bool, EvalError> {
        let field = record.resolve(&self.path);
        let operand = &self.operand;

        match self.op {
            Operator::Eq => Ok(field.equivalent(operand)),
            Operator::Ne => Ok(!field.equivalent(operand)),
            Operator::In | Operator::Nin => {
                let Value::List(items) = operand else {
                    return Err(self.mismatch(field));
                };
                let member = items.iter().any(|item| field.equivalent(item));
                Ok(member == (self.op == Operator::In))
            }
            Operator::Contains => match (field, operand) {
                (Value::Null, _) => Ok(false),
                (Value::Text(haystack), Value::Text(needle)) => {
                    Ok(haystack.contains(needle.as_str()))
                }
                (Value::List(items), item) => Ok(items.iter().any(|x| x.equivalent(item))),
                _ => Err(self.mismatch(field)),
            },
            Operator::StartsWith | Operator::EndsWith => match (field, operand) {
                (Value::Null, _) => Ok(false),
                (Value::Text(s), Value::Text(affix)) => Ok(if self.op == Operator::StartsWith {
                    s.starts_with(affix.as_str())
                } else {
                    s.ends_with(affix.as_str())
                }),
                _ => Err(self.mismatch(field)),
            },
            Operator::Regex => match (field, &self.pattern) {
                (Value::Null, _) => Ok(false),
                // Unanchored: the pattern may match anywhere in the text.
                (Value::Text(s), Some(pattern)) => Ok(pattern.is_match(s)),
                _ => Err(self.mismatch(field)),
            },
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                if field.is_null() {
                    return Ok(false);
                }
                let ord = field.compare(operand).ok_or_else(|| self.mismatch(field))?;
                Ok(match self.op {
                    Operator::Gt => ord.is_gt(),
                    Operator::Gte => ord.is_ge(),
                    Operator::Lt => ord.is_lt(),
                    _ => ord.is_le(),
                })
            }
        }
    }

    fn mismatch(&self, field: &Value) -> EvalError {
        EvalError {
            field: self.path.clone(),
            operator: self.op,
            field_kind: field.kind(),
            operand_kind: self.operand.kind(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{OPERATOR_SEPARATOR}{}={}",
            self.path, self.op, self.operand
        )
    }
}

/// Evaluate predicates as a conjunction, left to right.
///
/// Stops at the first predicate that is false or fails; an empty slice
/// matches every record.
pub fn matches_all(predicates: &[Predicate], record: &Record) -> Result<bool, EvalError> {
    for predicate in predicates {
        if !predicate.evaluate(record)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TableState;
    use crate::value::ValueKind;
    use serde_json::json;

    fn sample_record() -> Record {
        let mut state = TableState::new();
        state
            .prepare(
                "users",
                json!({
                    "name": "Alice Savage",
                    "age": 30,
                    "active": true,
                    "score": 95.5,
                    "address": {"city": "Portland", "zip": "97201"},
                    "tags": ["admin", "user", 7],
                    "metadata": null
                })
                .into(),
            )
            .unwrap()
    }

    fn eval(key: &str, operand: serde_json::Value) -> Result<bool, EvalError> {
        Predicate::compile(key, operand).unwrap().evaluate(&sample_record())
    }

    // -----------------------------------------------------------------------
    // Compilation
    // -----------------------------------------------------------------------

    #[test]
    fn test_compile_implicit_eq() {
        let p = Predicate::compile("name", "Alice").unwrap();
        assert_eq!(p.path(), "name");
        assert_eq!(p.operator(), Operator::Eq);
        assert_eq!(p.operand(), &Value::from("Alice"));
    }

    #[test]
    fn test_compile_every_operator() {
        for op in Operator::ALL {
            let operand = match op {
                Operator::In | Operator::Nin => json!([1]),
                Operator::StartsWith | Operator::EndsWith | Operator::Regex => json!("x"),
                _ => json!(1),
            };
            let p = Predicate::compile(&format!("f__{op}"), operand).unwrap();
            assert_eq!(p.operator(), op);
            assert_eq!(p.path(), "f");
        }
    }

    #[test]
    fn test_compile_splits_at_last_separator() {
        let p = Predicate::compile("first__name__startswith", "Al").unwrap();
        assert_eq!(p.path(), "first__name");
        assert_eq!(p.operator(), Operator::StartsWith);
    }

    #[test]
    fn test_compile_unknown_operator() {
        match Predicate::compile("age__bigger", 3) {
            Err(QueryError::UnknownOperator { key, operator }) => {
                assert_eq!(key, "age__bigger");
                assert_eq!(operator, "bigger");
            }
            other => panic!("expected UnknownOperator, got {other:?}"),
        }
    }

    #[test]
    fn test_compile_empty_field() {
        assert!(matches!(
            Predicate::compile("__gt", 3),
            Err(QueryError::EmptyField(_))
        ));
        assert!(matches!(
            Predicate::compile("", 3),
            Err(QueryError::EmptyField(_))
        ));
        assert!(matches!(
            Predicate::compile("a..b", 3),
            Err(QueryError::EmptyField(_))
        ));
    }

    #[test]
    fn test_compile_checks_operand_shape() {
        for (key, operand) in [
            ("age__in", json!(3)),
            ("age__nin", json!("x")),
            ("name__startswith", json!(1)),
            ("name__endswith", json!(["a"])),
            ("name__regex", json!(5)),
            ("age__gt", json!(true)),
            ("age__lte", json!(null)),
            ("age__gte", json!([1])),
        ] {
            match Predicate::compile(key, operand) {
                Err(QueryError::InvalidOperand { .. }) => {}
                other => panic!("{key}: expected InvalidOperand, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_compile_rejects_nan_operand() {
        assert!(matches!(
            Predicate::compile("score__gt", f64::NAN),
            Err(QueryError::InvalidOperand { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Equality
    // -----------------------------------------------------------------------

    #[test]
    fn test_eq_ne() {
        assert!(eval("name", json!("Alice Savage")).unwrap());
        assert!(!eval("name__eq", json!("Bob")).unwrap());
        assert!(eval("name__ne", json!("Bob")).unwrap());
        assert!(!eval("age__ne", json!(30)).unwrap());
        assert!(eval("active", json!(true)).unwrap());
    }

    #[test]
    fn test_eq_numeric_across_kinds() {
        assert!(eval("age", json!(30.0)).unwrap());
        assert!(!eval("score", json!(95)).unwrap());
    }

    #[test]
    fn test_eq_mismatched_kinds_is_false_not_error() {
        assert!(!eval("name", json!(42)).unwrap());
        assert!(eval("active__ne", json!(1)).unwrap());
    }

    #[test]
    fn test_eq_structured_values() {
        assert!(eval("tags", json!(["admin", "user", 7.0])).unwrap());
        assert!(eval("address", json!({"city": "Portland", "zip": "97201"})).unwrap());
        assert!(!eval("address", json!({"city": "Portland"})).unwrap());
    }

    #[test]
    fn test_eq_null_and_missing() {
        assert!(eval("metadata", json!(null)).unwrap());
        assert!(eval("nonexistent", json!(null)).unwrap());
        assert!(!eval("nonexistent", json!(1)).unwrap());
        assert!(eval("nonexistent__ne", json!(1)).unwrap());
    }

    // -----------------------------------------------------------------------
    // Containment and affixes
    // -----------------------------------------------------------------------

    #[test]
    fn test_contains_text() {
        assert!(eval("name__contains", json!("Savage")).unwrap());
        assert!(!eval("name__contains", json!("savage")).unwrap());
    }

    #[test]
    fn test_contains_list_uses_element_equality() {
        assert!(eval("tags__contains", json!("admin")).unwrap());
        assert!(eval("tags__contains", json!(7.0)).unwrap());
        // No substring matching inside list elements.
        assert!(!eval("tags__contains", json!("adm")).unwrap());
    }

    #[test]
    fn test_contains_incompatible_is_error() {
        let err = eval("age__contains", json!(3)).unwrap_err();
        assert_eq!(err.field, "age");
        assert_eq!(err.operator, Operator::Contains);
        assert_eq!(err.field_kind, ValueKind::Integer);
        assert_eq!(err.operand_kind, ValueKind::Integer);

        // Text field, non-text operand.
        assert!(eval("name__contains", json!(1)).is_err());
        assert!(eval("address__contains", json!("city")).is_err());
    }

    #[test]
    fn test_startswith_endswith() {
        assert!(eval("name__startswith", json!("Ali")).unwrap());
        assert!(!eval("name__startswith", json!("Savage")).unwrap());
        assert!(eval("name__endswith", json!("Savage")).unwrap());
        assert!(!eval("name__endswith", json!("Alice")).unwrap());
        assert!(eval("age__startswith", json!("3")).is_err());
        assert!(eval("tags__endswith", json!("user")).is_err());
    }

    #[test]
    fn test_regex() {
        assert!(eval("name__regex", json!("^Ali.*age$")).unwrap());
        assert!(eval("name__regex", json!("Sav")).unwrap());
        assert!(!eval("name__regex", json!("^Savage")).unwrap());
        assert!(eval("address.zip__regex", json!(r"^\d{5}$")).unwrap());
        assert!(!eval("missing__regex", json!(".*")).unwrap());
        assert!(!eval("metadata__regex", json!(".*")).unwrap());
    }

    #[test]
    fn test_regex_incompatible_field_is_error() {
        let err = eval("age__regex", json!("3")).unwrap_err();
        assert_eq!(err.operator, Operator::Regex);
        assert_eq!(err.field_kind, ValueKind::Integer);
        assert!(eval("tags__regex", json!("admin")).is_err());
    }

    #[test]
    fn test_regex_invalid_pattern() {
        match Predicate::compile("name__regex", "([unclosed") {
            Err(QueryError::InvalidOperand { operator, .. }) => {
                assert_eq!(operator, Operator::Regex)
            }
            other => panic!("expected InvalidOperand, got {other:?}"),
        }
    }

    #[test]
    fn test_null_field_never_matches_text_or_ordering_ops() {
        assert!(!eval("metadata__contains", json!("x")).unwrap());
        assert!(!eval("missing__startswith", json!("x")).unwrap());
        assert!(!eval("missing__endswith", json!("x")).unwrap());
        assert!(!eval("missing__gt", json!(1)).unwrap());
        assert!(!eval("metadata__lte", json!("z")).unwrap());
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[test]
    fn test_ordering_numbers() {
        assert!(eval("age__gt", json!(21)).unwrap());
        assert!(!eval("age__gt", json!(30)).unwrap());
        assert!(eval("age__gte", json!(30)).unwrap());
        assert!(eval("age__lt", json!(30.5)).unwrap());
        assert!(!eval("age__lt", json!(30)).unwrap());
        assert!(eval("age__lte", json!(30)).unwrap());
        assert!(eval("score__gt", json!(90)).unwrap());
    }

    #[test]
    fn test_ordering_text() {
        assert!(eval("name__lt", json!("Bob")).unwrap());
        assert!(eval("name__gt", json!("Alice")).unwrap());
    }

    #[test]
    fn test_ordering_incompatible_is_error() {
        assert!(eval("active__gt", json!(1)).is_err());
        assert!(eval("name__gt", json!(1)).is_err());
        assert!(eval("age__lt", json!("40")).is_err());
        assert!(eval("tags__gte", json!(1)).is_err());
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    #[test]
    fn test_in_nin() {
        assert!(eval("age__in", json!([18, 30, 45])).unwrap());
        assert!(!eval("age__in", json!([18, 45])).unwrap());
        assert!(eval("age__nin", json!([18, 45])).unwrap());
        assert!(!eval("name__nin", json!(["Alice Savage"])).unwrap());
        assert!(eval("missing__in", json!([null])).unwrap());
        assert!(!eval("age__in", json!([])).unwrap());
    }

    // -----------------------------------------------------------------------
    // Nested paths and conjunction
    // -----------------------------------------------------------------------

    #[test]
    fn test_nested_path() {
        assert!(eval("address.city", json!("Portland")).unwrap());
        assert!(eval("address.zip__startswith", json!("97")).unwrap());
        assert!(!eval("address.country", json!("US")).unwrap());
    }

    #[test]
    fn test_matches_all_empty_is_true() {
        assert!(matches_all(&[], &sample_record()).unwrap());
    }

    #[test]
    fn test_matches_all_short_circuits() {
        let record = sample_record();
        let failing = Predicate::compile("active__gt", 1).unwrap();
        let false_first = vec![Predicate::compile("name", "Bob").unwrap(), failing.clone()];
        // The first predicate is false, so the erroring one is never reached.
        assert!(!matches_all(&false_first, &record).unwrap());

        let true_first = vec![Predicate::compile("name", "Alice Savage").unwrap(), failing];
        assert!(matches_all(&true_first, &record).is_err());
    }

    #[test]
    fn test_operator_parse_roundtrip() {
        for op in Operator::ALL {
            assert_eq!(Operator::parse(op.as_str()), Some(op));
        }
        assert_eq!(Operator::parse("regex"), Some(Operator::Regex));
        assert_eq!(Operator::parse("iregex"), None);
    }

    #[test]
    fn test_display() {
        let p = Predicate::compile("age__gte", 21).unwrap();
        assert_eq!(p.to_string(), "age__gte=21");
    }
}
