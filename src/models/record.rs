use serde_json::{Map, Value};

use super::table::{cell_text, is_empty_cell, Cell};

/// Name of the reserved column carrying external record identity.
pub const ID_FIELD: &str = "id";

/// An ordered set of named cells.
///
/// A record with a non-empty `id` field refers to an existing row in the
/// external store; any other record is a new row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Cell)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from pairs. A repeated name keeps the last value.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Cell)>,
    {
        let mut record = Self::new();
        for (key, value) in pairs {
            record.insert(key, value);
        }
        record
    }

    /// Builds a record from an external id and a JSON object of fields.
    pub fn from_store(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        let mut record = Self::new();
        record.insert(ID_FIELD, Value::String(id.into()));
        for (key, value) in fields {
            if key != ID_FIELD {
                record.insert(key, value);
            }
        }
        record
    }

    /// Sets a field, keeping its original position if it already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: Cell) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Cell> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// External identity, if present and non-empty.
    pub fn id(&self) -> Option<String> {
        self.get(ID_FIELD)
            .filter(|cell| !is_empty_cell(cell))
            .map(cell_text)
    }

    pub fn has_id(&self) -> bool {
        self.id().is_some()
    }

    /// Copy of this record without the `id` field.
    pub fn without_id(&self) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .filter(|(k, _)| k != ID_FIELD)
                .cloned()
                .collect(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn fields(&self) -> &[(String, Cell)] {
        &self.fields
    }

    /// Fields other than `id` as a JSON object, the shape Airtable expects.
    pub fn to_store_fields(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| k != ID_FIELD)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_requires_non_empty_value() {
        let with_id = Record::from_pairs([("id", json!("r1")), ("name", json!("Alice"))]);
        let blank_id = Record::from_pairs([("id", json!("")), ("name", json!("Bob"))]);
        let no_id = Record::from_pairs([("name", json!("Carol"))]);

        assert_eq!(with_id.id(), Some("r1".to_string()));
        assert!(!blank_id.has_id());
        assert!(!no_id.has_id());
    }

    #[test]
    fn test_insert_keeps_position() {
        let mut record = Record::from_pairs([("a", json!(1)), ("b", json!(2))]);
        record.insert("a", json!(3));
        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(record.get("a"), Some(&json!(3)));
    }

    #[test]
    fn test_from_store_puts_id_first() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Alice"));
        fields.insert("age".into(), json!(30));
        let record = Record::from_store("rec1", fields);

        let keys: Vec<&str> = record.keys().collect();
        assert_eq!(keys, vec!["id", "name", "age"]);
    }

    #[test]
    fn test_to_store_fields_drops_id() {
        let record = Record::from_pairs([("id", json!("r1")), ("name", json!("Alicia"))]);
        let fields = record.to_store_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("name"), Some(&json!("Alicia")));
        assert!(record.without_id().get("id").is_none());
    }
}
