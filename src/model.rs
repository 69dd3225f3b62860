use crate::error::DayFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A normalized book + chapter pointer such as `1 Samuel 7` or `Psalms 46–48`.
///
/// Two references are equal when they match ignoring ASCII case and runs of
/// whitespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn key(&self) -> String {
        self.0
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase()
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayRecord {
    pub day: u32,
    pub references: Vec<Reference>,
    pub media_links: Vec<String>,
}

impl DayRecord {
    pub fn readings(&self) -> String {
        self.references
            .iter()
            .map(Reference::as_str)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeReport {
    pub records: Vec<DayRecord>,
    pub failures: Vec<DayFailure>,
}

impl ScrapeReport {
    pub fn record(&self, day: u32) -> Option<&DayRecord> {
        self.records
            .binary_search_by_key(&day, |record| record.day)
            .ok()
            .map(|index| &self.records[index])
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rejected: usize,
    pub total_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PopulateReport {
    pub plan: String,
    pub output: String,
    pub start_day: u32,
    pub end_day: u32,
    pub scraped: usize,
    pub failures: Vec<DayFailure>,
    pub merge: MergeSummary,
}
