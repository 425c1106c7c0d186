//! Parsed records.

use std::fmt;

use serde::Serialize;

/// An ordered list of fields taken from one delimited record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Record {
    pub fields: Vec<String>,
}

impl Record {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Encode for sending to the device: fields joined by `field_delimiter`
    /// and terminated by `record_delimiter`.
    pub fn to_wire(&self, field_delimiter: char, record_delimiter: char) -> String {
        let separator = field_delimiter.to_string();
        let mut out = self.fields.join(separator.as_str());
        out.push(record_delimiter);
        out
    }
}

impl<S: Into<String>> FromIterator<S> for Record {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields.join(","))
    }
}
