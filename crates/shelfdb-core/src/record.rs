//! Records and the per-table record store.

use std::collections::{BTreeMap, HashSet};
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::error::{Error, SchemaError};
use crate::types::{FIRST_AUTO_ID, ID_FIELD, MAX_NESTING_DEPTH};
use crate::value::Value;

/// A schema-less record: field name to value, always carrying an `id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub(crate) fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    /// The record id (an `Integer` or `Text` value).
    pub fn id(&self) -> &Value {
        &self[ID_FIELD]
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Resolve a field name or dot-separated path; `Value::Null` if missing.
    ///
    /// A top-level field whose name is exactly `path` wins over descending
    /// into nested maps, so fields named like `"a.b"` stay reachable.
    pub fn resolve(&self, path: &str) -> &Value {
        if let Some(value) = self.fields.get(path) {
            return value;
        }
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = &self[head];
        match rest {
            Some(rest) => value.resolve(rest),
            None => value,
        }
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Overwrite or add top-level fields. The caller guarantees `id` is not touched.
    pub(crate) fn merge(&mut self, changes: &BTreeMap<String, Value>) {
        for (field, value) in changes {
            self.fields.insert(field.clone(), value.clone());
        }
    }
}

impl Index<&str> for Record {
    type Output = Value;

    /// Missing fields index as `Value::Null`.
    fn index(&self, field: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.fields.get(field).unwrap_or(NULL)
    }
}

/// Hashable form of a record id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum RecordKey {
    Integer(i64),
    Text(String),
}

impl RecordKey {
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(n) => Some(RecordKey::Integer(*n)),
            Value::Text(s) => Some(RecordKey::Text(s.clone())),
            _ => None,
        }
    }
}

/// The full state of one table: its records in insertion order plus the
/// next auto-assigned id.
///
/// Mutations happen on a private clone; the database publishes the clone
/// only after it has been flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct TableState {
    records: Vec<Record>,
    ids: HashSet<RecordKey>,
    next_id: i64,
}

impl Default for TableState {
    fn default() -> Self {
        Self::new()
    }
}

impl TableState {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            ids: HashSet::new(),
            next_id: FIRST_AUTO_ID,
        }
    }

    /// Rebuild a table from persisted parts, checking the id invariants.
    ///
    /// The error string describes the first violated invariant.
    pub fn from_parts(records: Vec<Record>, next_id: i64) -> Result<Self, String> {
        let mut ids = HashSet::with_capacity(records.len());
        for (pos, record) in records.iter().enumerate() {
            let key = RecordKey::from_value(record.id()).ok_or_else(|| {
                format!(
                    "record {pos} has an id of kind {}, expected integer or text",
                    record.id().kind()
                )
            })?;
            if let RecordKey::Integer(n) = key
                && n >= next_id
                && next_id != i64::MAX
            {
                return Err(format!("record {pos} has id {n} but next_id is {next_id}"));
            }
            if !ids.insert(key) {
                return Err(format!("duplicate id {} at record {pos}", record.id()));
            }
        }
        Ok(Self {
            records,
            ids,
            next_id,
        })
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The id the next auto-assigned record will receive.
    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    pub fn contains_id(&self, id: &Value) -> bool {
        RecordKey::from_value(id).is_some_and(|key| self.ids.contains(&key))
    }

    /// Turn caller-supplied fields into a record with a unique id.
    ///
    /// Reserves the id (advancing the counter) but does not append the record.
    pub(crate) fn prepare(&mut self, table: &str, fields: Value) -> Result<Record, Error> {
        let mut fields = match fields {
            Value::Map(map) => map,
            other => {
                return Err(SchemaError::InvalidRecord(format!(
                    "record fields must be a map, got {}",
                    other.kind()
                ))
                .into());
            }
        };
        check_storable(fields.values())?;

        let id = match fields.remove(ID_FIELD) {
            Some(id) => {
                let key = RecordKey::from_value(&id).ok_or_else(|| {
                    SchemaError::InvalidRecord(format!(
                        "id must be an integer or text, got {}",
                        id.kind()
                    ))
                })?;
                if self.ids.contains(&key) {
                    return Err(SchemaError::IdCollision {
                        table: table.to_string(),
                        id,
                    }
                    .into());
                }
                if let RecordKey::Integer(n) = key
                    && n >= self.next_id
                {
                    self.next_id = n.checked_add(1).unwrap_or(i64::MAX);
                }
                id
            }
            None => {
                let n = self.next_id;
                if self.ids.contains(&RecordKey::Integer(n)) {
                    return Err(SchemaError::IdCollision {
                        table: table.to_string(),
                        id: Value::Integer(n),
                    }
                    .into());
                }
                self.next_id = n.checked_add(1).unwrap_or(i64::MAX);
                Value::Integer(n)
            }
        };

        fields.insert(ID_FIELD.to_string(), id);
        Ok(Record::from_fields(fields))
    }

    /// Append a record produced by [`prepare`](Self::prepare).
    pub(crate) fn push(&mut self, record: Record) {
        if let Some(key) = RecordKey::from_value(record.id()) {
            self.ids.insert(key);
        }
        self.records.push(record);
    }

    pub(crate) fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    /// Remove every record for which `matches` returns true, keeping the
    /// relative order of the rest. Stops at the first error, leaving `self`
    /// partially rebuilt; callers work on a copy.
    pub(crate) fn remove_where<E>(
        &mut self,
        mut matches: impl FnMut(&Record) -> Result<bool, E>,
    ) -> Result<usize, E> {
        let before = self.records.len();
        let mut kept = Vec::with_capacity(before);
        for record in std::mem::take(&mut self.records) {
            if matches(&record)? {
                if let Some(key) = RecordKey::from_value(record.id()) {
                    self.ids.remove(&key);
                }
            } else {
                kept.push(record);
            }
        }
        self.records = kept;
        Ok(before - self.records.len())
    }

    /// Drop all records. The id counter is kept so ids are not reused.
    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.ids.clear();
    }
}

/// Reject field values a table file cannot hold and read back.
pub(crate) fn check_storable<'a>(
    values: impl IntoIterator<Item = &'a Value>,
) -> Result<(), SchemaError> {
    for value in values {
        if !value.is_finite() {
            return Err(SchemaError::InvalidRecord("non-finite float value".to_string()));
        }
        if value.exceeds_depth(MAX_NESTING_DEPTH) {
            return Err(SchemaError::InvalidRecord(format!(
                "value nested deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prepare_push(state: &mut TableState, fields: serde_json::Value) -> Result<Value, Error> {
        let record = state.prepare("t", fields.into())?;
        let id = record.id().clone();
        state.push(record);
        Ok(id)
    }

    #[test]
    fn test_auto_ids_increase() {
        let mut state = TableState::new();
        assert_eq!(prepare_push(&mut state, json!({"a": 1})).unwrap(), 1);
        assert_eq!(prepare_push(&mut state, json!({"a": 2})).unwrap(), 2);
        assert_eq!(state.next_id(), 3);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_explicit_id_used_as_is() {
        let mut state = TableState::new();
        assert_eq!(
            prepare_push(&mut state, json!({"id": "abc", "a": 1})).unwrap(),
            "abc"
        );
        assert!(state.contains_id(&Value::from("abc")));
        // Text ids do not move the counter.
        assert_eq!(state.next_id(), 1);
    }

    #[test]
    fn test_explicit_integer_id_advances_counter() {
        let mut state = TableState::new();
        prepare_push(&mut state, json!({"id": 10})).unwrap();
        assert_eq!(state.next_id(), 11);
        assert_eq!(prepare_push(&mut state, json!({})).unwrap(), 11);

        // Lower explicit ids leave the counter alone.
        prepare_push(&mut state, json!({"id": 3})).unwrap();
        assert_eq!(state.next_id(), 12);
    }

    #[test]
    fn test_id_collision() {
        let mut state = TableState::new();
        prepare_push(&mut state, json!({"id": 1, "name": "A"})).unwrap();
        match prepare_push(&mut state, json!({"id": 1, "name": "B"})) {
            Err(Error::Schema(SchemaError::IdCollision { table, id })) => {
                assert_eq!(table, "t");
                assert_eq!(id, 1);
            }
            other => panic!("expected IdCollision, got {other:?}"),
        }
        assert_eq!(state.records()[0]["name"], "A");
    }

    #[test]
    fn test_invalid_id_kind() {
        let mut state = TableState::new();
        for bad in [json!({"id": 1.5}), json!({"id": null}), json!({"id": [1]})] {
            match state.prepare("t", bad.into()) {
                Err(Error::Schema(SchemaError::InvalidRecord(_))) => {}
                other => panic!("expected InvalidRecord, got {other:?}"),
            }
        }
        assert_eq!(state.next_id(), 1);
    }

    #[test]
    fn test_fields_must_be_map() {
        let mut state = TableState::new();
        assert!(state.prepare("t", json!([1, 2]).into()).is_err());
        assert!(state.prepare("t", Value::from(5)).is_err());
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut state = TableState::new();
        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), Value::Float(f64::NAN));
        assert!(state.prepare("t", Value::Map(fields)).is_err());
    }

    #[test]
    fn test_remove_where_keeps_order() {
        let mut state = TableState::new();
        for (i, status) in ["a", "x", "b", "x", "c"].iter().enumerate() {
            prepare_push(&mut state, json!({"n": i, "status": status})).unwrap();
        }
        let removed = state
            .remove_where(|r| Ok::<_, ()>(r["status"] == "x"))
            .unwrap();
        assert_eq!(removed, 2);
        let left: Vec<_> = state.records().iter().map(|r| r["status"].clone()).collect();
        assert_eq!(left, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
        assert!(!state.contains_id(&Value::Integer(2)));
        assert!(state.contains_id(&Value::Integer(3)));
    }

    #[test]
    fn test_clear_keeps_counter() {
        let mut state = TableState::new();
        prepare_push(&mut state, json!({})).unwrap();
        prepare_push(&mut state, json!({})).unwrap();
        state.clear();
        assert!(state.is_empty());
        assert_eq!(prepare_push(&mut state, json!({})).unwrap(), 3);
    }

    #[test]
    fn test_from_parts_rejects_duplicates() {
        let mut state = TableState::new();
        prepare_push(&mut state, json!({"id": 1})).unwrap();
        let rec = state.records()[0].clone();
        let err = TableState::from_parts(vec![rec.clone(), rec], 5).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn test_from_parts_rejects_stale_counter() {
        let mut state = TableState::new();
        prepare_push(&mut state, json!({"id": 7})).unwrap();
        let rec = state.records()[0].clone();
        assert!(TableState::from_parts(vec![rec.clone()], 7).is_err());
        assert!(TableState::from_parts(vec![rec], 8).is_ok());
    }

    #[test]
    fn test_resolve_nested_path() {
        let mut state = TableState::new();
        prepare_push(&mut state, json!({"addr": {"city": "Oslo"}})).unwrap();
        let rec = &state.records()[0];
        assert_eq!(rec.resolve("addr.city"), &Value::from("Oslo"));
        assert_eq!(rec.resolve("addr.zip"), &Value::Null);
        assert_eq!(rec["missing"], Value::Null);
    }

    #[test]
    fn test_resolve_dotted_field_name() {
        let mut state = TableState::new();
        prepare_push(&mut state, json!({"a.b": 1, "a": {"b": 2}, "c": {"d": 3}})).unwrap();
        let rec = &state.records()[0];
        assert_eq!(rec.resolve("a.b"), &Value::Integer(1));
        assert_eq!(rec.resolve("c.d"), &Value::Integer(3));
        assert_eq!(rec.resolve("c.e"), &Value::Null);
    }

    fn nested(depth: usize) -> Value {
        (0..depth).fold(Value::Integer(1), |inner, _| Value::List(vec![inner]))
    }

    #[test]
    fn test_nesting_limit() {
        let mut state = TableState::new();
        let mut fields = BTreeMap::new();
        fields.insert("deep".to_string(), nested(MAX_NESTING_DEPTH));
        assert!(state.prepare("t", Value::Map(fields.clone())).is_ok());

        fields.insert("deep".to_string(), nested(MAX_NESTING_DEPTH + 1));
        match state.prepare("t", Value::Map(fields)) {
            Err(Error::Schema(SchemaError::InvalidRecord(reason))) => {
                assert!(reason.contains("nested"))
            }
            other => panic!("expected InvalidRecord, got {other:?}"),
        }
        // The rejected record did not reserve an id.
        assert_eq!(state.next_id(), 2);
    }
}
