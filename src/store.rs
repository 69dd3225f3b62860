use crate::error::MergeError;
use crate::model::MergeSummary;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const DEFAULT_KEY_COLUMN: &str = "Day";

/// One tabular row: column name to value, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    cells: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    /// Returns true when the stored value changed.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) -> bool {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) if *existing == value => false,
            Some((_, existing)) => {
                *existing = value;
                true
            }
            None => {
                self.cells.push((column, value));
                true
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn key(&self, key_column: &str) -> Option<String> {
        self.get(key_column)
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(ToString::to_string)
    }

    fn merge_from(&mut self, other: &Row) -> bool {
        let mut changed = false;
        for (column, value) in other.iter() {
            changed |= self.set(column, value);
        }
        changed
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.set(column, value);
        }
        row
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    header: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.rows.is_empty()
    }

    pub fn find(&self, key_column: &str, key: &str) -> Option<&Row> {
        self.rows
            .iter()
            .find(|row| row.get(key_column).map(str::trim) == Some(key))
    }
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub key_column: String,
    pub sort_numeric: bool,
    /// Order for columns the table does not have yet. Columns not listed
    /// follow in first-appearance order.
    pub columns: Vec<String>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            key_column: DEFAULT_KEY_COLUMN.to_string(),
            sort_numeric: false,
            columns: Vec::new(),
        }
    }
}

/// A fully written and synced temp file that has not replaced its
/// destination yet. Dropping it discards the temp file.
#[derive(Debug)]
pub struct StagedTable {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl StagedTable {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn commit(self) -> Result<(), MergeError> {
        let destination = self.destination;
        self.temp
            .persist(&destination)
            .map_err(|err| MergeError::Write {
                path: destination.clone(),
                source: err.error,
            })?;
        debug!(path = %destination.display(), "table replaced");
        Ok(())
    }
}

pub fn load_table(path: &Path) -> Result<Table, MergeError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Table::default()),
        Err(err) => {
            return Err(MergeError::Read {
                path: path.to_path_buf(),
                source: err,
            });
        }
    };
    parse_table(&content, path)
}

pub fn parse_table(content: &str, path: &Path) -> Result<Table, MergeError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    if content.trim().is_empty() {
        return Ok(Table::default());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let parse_err = |source| MergeError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let mut records = reader.records();
    let Some(first) = records.next() else {
        return Ok(Table::default());
    };
    let columns = first
        .map_err(parse_err)?
        .iter()
        .map(|name| name.trim_start_matches('\u{feff}').trim().to_string())
        .collect::<Vec<_>>();

    let mut header: Vec<String> = Vec::new();
    for column in &columns {
        if !header.contains(column) {
            header.push(column.clone());
        }
    }

    let mut rows = Vec::new();
    for record in records {
        let record = record.map_err(parse_err)?;
        let mut row = Row::new();
        for (index, column) in columns.iter().enumerate() {
            let value = record.get(index).unwrap_or("");
            // Duplicate column names keep the first non-empty value.
            match row.get(column) {
                Some(existing) if !existing.is_empty() => {}
                _ => {
                    row.set(column.as_str(), value);
                }
            }
        }
        rows.push(row);
    }

    Ok(Table { header, rows })
}

/// Key column first, then the existing header, then preferred columns, then
/// columns only seen in updates in first-appearance order.
pub fn resolve_header(
    existing: &[String],
    preferred: &[String],
    updates: &[Row],
    key_column: &str,
) -> Vec<String> {
    let mut header = vec![key_column.to_string()];
    let candidates = existing
        .iter()
        .chain(preferred)
        .map(String::as_str)
        .chain(updates.iter().flat_map(Row::columns));
    for column in candidates {
        if !header.iter().any(|known| known == column) {
            header.push(column.to_string());
        }
    }
    header
}

pub fn merge_rows(
    existing: Table,
    updates: &[Row],
    options: &MergeOptions,
) -> Result<(Table, MergeSummary), MergeError> {
    let key_column = options.key_column.as_str();
    if key_column.trim().is_empty() {
        return Err(MergeError::EmptyKeyColumn);
    }

    let header = resolve_header(&existing.header, &options.columns, updates, key_column);
    let mut summary = MergeSummary::default();
    let mut rows: Vec<Row> = Vec::with_capacity(existing.rows.len() + updates.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in existing.rows {
        let Some(key) = row.key(key_column) else {
            continue;
        };
        match positions.get(&key) {
            Some(&index) => {
                rows[index].merge_from(&row);
            }
            None => {
                positions.insert(key, rows.len());
                rows.push(row);
            }
        }
    }
    let existing_count = rows.len();

    for update in updates {
        let Some(key) = update.key(key_column) else {
            summary.rejected += 1;
            warn!(key_column, "update row without a key rejected");
            continue;
        };

        match positions.get(&key) {
            Some(&index) => {
                let mut changed = rows[index].merge_from(update);
                changed |= rows[index].set(key_column, key.as_str());
                if index < existing_count {
                    if changed {
                        summary.updated += 1;
                    } else {
                        summary.unchanged += 1;
                    }
                }
            }
            None => {
                let mut row = update.clone();
                row.set(key_column, key.as_str());
                positions.insert(key, rows.len());
                rows.push(row);
                summary.inserted += 1;
            }
        }
    }

    rows[existing_count..].sort_by(|a, b| {
        compare_keys(
            a.get(key_column).unwrap_or_default(),
            b.get(key_column).unwrap_or_default(),
            options.sort_numeric,
        )
    });

    summary.total_rows = rows.len();
    Ok((Table { header, rows }, summary))
}

pub fn compare_keys(a: &str, b: &str, numeric: bool) -> Ordering {
    if !numeric {
        return a.cmp(b);
    }

    let number = |value: &str| value.parse::<f64>().ok().filter(|n| n.is_finite());
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Writes `table` to a temp file beside `path` and syncs it. Nothing at
/// `path` changes until [`StagedTable::commit`].
pub fn stage_table(path: &Path, table: &Table) -> Result<StagedTable, MergeError> {
    let write_err = |source| MergeError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(write_err)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string());
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;

    {
        let mut writer = csv::WriterBuilder::new().from_writer(temp.as_file_mut());
        let encode_err = |source| MergeError::Encode {
            path: path.to_path_buf(),
            source,
        };

        if !table.header.is_empty() {
            writer.write_record(&table.header).map_err(encode_err)?;
        }
        for row in &table.rows {
            writer
                .write_record(
                    table
                        .header
                        .iter()
                        .map(|column| row.get(column).unwrap_or_default()),
                )
                .map_err(encode_err)?;
        }
        writer.flush().map_err(write_err)?;
    }
    temp.as_file().sync_all().map_err(write_err)?;

    Ok(StagedTable {
        temp,
        destination: path.to_path_buf(),
    })
}

pub fn write_table(path: &Path, table: &Table) -> Result<(), MergeError> {
    stage_table(path, table)?.commit()
}

/// Load, merge and atomically replace the table at `path`.
pub fn merge_file(
    path: &Path,
    updates: &[Row],
    options: &MergeOptions,
) -> Result<MergeSummary, MergeError> {
    let existing = load_table(path)?;
    let (merged, summary) = merge_rows(existing, updates, options)?;
    write_table(path, &merged)?;

    info!(
        path = %path.display(),
        inserted = summary.inserted,
        updated = summary.updated,
        unchanged = summary.unchanged,
        rejected = summary.rejected,
        rows = summary.total_rows,
        "table merged"
    );
    Ok(summary)
}
