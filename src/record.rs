/// One matched directory entry: field values in the order they were requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    values: Vec<(String, String)>,
}

impl Record {
    pub fn new(values: Vec<(String, String)>) -> Self {
        Self { values }
    }

    /// Value of a field; names compare case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Outcome of a lookup or validation.
///
/// `truncated` is set when the server matched more entries than it was
/// willing to return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBatch {
    pub records: Vec<Record>,
    pub truncated: bool,
}

impl RecordBatch {
    pub fn new(records: Vec<Record>, truncated: bool) -> Self {
        Self { records, truncated }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }
}

impl IntoIterator for RecordBatch {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a RecordBatch {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_order() {
        let record = Record::new(vec![
            ("name".to_string(), "Jane Doe".to_string()),
            ("email".to_string(), "jane@example.edu".to_string()),
        ]);

        assert_eq!(record.fields().collect::<Vec<_>>(), vec!["name", "email"]);
        assert_eq!(record.get("EMAIL"), Some("jane@example.edu"));
        assert_eq!(record.get("phone"), None);
    }

    #[test]
    fn empty_batch() {
        let batch = RecordBatch::default();

        assert!(batch.is_empty());
        assert!(!batch.truncated);
        assert_eq!(batch.into_iter().count(), 0);
    }
}
