use crate::error::MergeError;
use crate::media::CANONICAL_VIDEO_HOST;
use crate::pipeline::CombinedColumns;
use crate::store::{DEFAULT_KEY_COLUMN, Row, Table, load_table};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanDay {
    pub day: u32,
    pub ot_readings: Vec<String>,
    pub nt_readings: Vec<String>,
    pub ot_url: String,
    pub nt_url: String,
    pub videos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub reference: String,
    pub day: u32,
}

/// Reads a combined plan table. Rows whose `Day` is not a number are left out.
pub fn load_catalog(path: &Path, columns: &CombinedColumns) -> Result<Vec<PlanDay>, MergeError> {
    let table = load_table(path)?;
    Ok(catalog_from_table(&table, columns))
}

pub fn catalog_from_table(table: &Table, columns: &CombinedColumns) -> Vec<PlanDay> {
    let mut days = table
        .rows()
        .iter()
        .filter_map(|row| plan_day(row, columns))
        .collect::<Vec<_>>();
    days.sort_by_key(|day| day.day);
    days
}

fn plan_day(row: &Row, columns: &CombinedColumns) -> Option<PlanDay> {
    let day = row.get(DEFAULT_KEY_COLUMN)?.trim().parse::<u32>().ok()?;
    let cell = |column: &str| row.get(column).unwrap_or_default().trim();

    Some(PlanDay {
        day,
        ot_readings: split_cell(cell(&columns.first_readings), ';'),
        nt_readings: split_cell(cell(&columns.second_readings), ';'),
        ot_url: cell(&columns.first_url).to_string(),
        nt_url: cell(&columns.second_url).to_string(),
        videos: split_cell(cell(&columns.media), '|')
            .iter()
            .map(|url| normalize_video_url(url))
            .collect(),
    })
}

fn split_cell(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Rewrites watch, short-link and shorts urls to the embed form. Embed urls
/// and anything unrecognized come back unchanged.
pub fn normalize_video_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains("/embed/") {
        return raw.to_string();
    }
    let Ok(url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let query = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    };

    let (id, start) = if host == "youtu.be" {
        let id = url.path().trim_start_matches('/').to_string();
        (id, query("t"))
    } else if host.ends_with("youtube.com") {
        if let Some(id) = url.path().strip_prefix("/shorts/") {
            (id.trim_end_matches('/').to_string(), None)
        } else if let Some(id) = query("v") {
            let start = query("t").map(|t| t.trim_end_matches('s').to_string());
            (id, start)
        } else {
            return raw.to_string();
        }
    } else {
        return raw.to_string();
    };

    if id.is_empty() {
        return raw.to_string();
    }
    match start {
        Some(start) => format!("{CANONICAL_VIDEO_HOST}/embed/{id}?start={start}"),
        None => format!("{CANONICAL_VIDEO_HOST}/embed/{id}"),
    }
}

/// Every `(reference, day)` pair once, ordered by reference then day.
pub fn scripture_index(days: &[PlanDay]) -> Vec<IndexEntry> {
    let mut seen = HashSet::new();
    let mut index = Vec::new();

    for day in days {
        for reference in day.ot_readings.iter().chain(&day.nt_readings) {
            if seen.insert((reference.as_str(), day.day)) {
                index.push(IndexEntry {
                    reference: reference.clone(),
                    day: day.day,
                });
            }
        }
    }

    index.sort_by(|a, b| {
        a.reference
            .to_lowercase()
            .cmp(&b.reference.to_lowercase())
            .then_with(|| a.reference.cmp(&b.reference))
            .then_with(|| a.day.cmp(&b.day))
    });
    index
}
