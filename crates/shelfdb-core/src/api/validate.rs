use crate::record::Record;

/// A check run on every record before it is written.
///
/// Returning `Err(reason)` rejects the write; the database reports it as
/// `SchemaError::ValidationFailed` and changes nothing. Any
/// `Fn(&Record) -> Result<(), String>` is a validator.
pub trait Validator {
    fn validate(&self, record: &Record) -> Result<(), String>;
}

impl<F> Validator for F
where
    F: Fn(&Record) -> Result<(), String>,
{
    fn validate(&self, record: &Record) -> Result<(), String> {
        self(record)
    }
}

/// Rejects records missing any of the listed top-level fields (or holding
/// `null` there).
#[derive(Debug, Clone)]
pub struct RequiredFields(pub Vec<String>);

impl RequiredFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }
}

impl Validator for RequiredFields {
    fn validate(&self, record: &Record) -> Result<(), String> {
        match self.0.iter().find(|f| record[f.as_str()].is_null()) {
            Some(missing) => Err(format!("missing required field '{missing}'")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TableState;
    use serde_json::json;

    fn record(fields: serde_json::Value) -> Record {
        TableState::new().prepare("t", fields.into()).unwrap()
    }

    #[test]
    fn test_closure_validator() {
        let adults = |r: &Record| match r["age"].as_i64() {
            Some(age) if age >= 18 => Ok(()),
            _ => Err("must be an adult".to_string()),
        };
        assert!(adults.validate(&record(json!({"age": 30}))).is_ok());
        assert_eq!(
            adults.validate(&record(json!({"age": 12}))),
            Err("must be an adult".to_string())
        );
    }

    #[test]
    fn test_required_fields() {
        let v = RequiredFields::new(["name", "email"]);
        assert!(v.validate(&record(json!({"name": "a", "email": "b"}))).is_ok());
        let err = v
            .validate(&record(json!({"name": "a", "email": null})))
            .unwrap_err();
        assert!(err.contains("email"));
    }
}
