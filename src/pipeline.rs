use crate::error::{DayFailure, ErrorKind, PlanError};
use crate::fetch::{FetchOptions, Fetcher};
use crate::media::extract_media;
use crate::model::{DayRecord, MergeSummary, PopulateReport, ScrapeReport};
use crate::references::extract_references;
use crate::scheduler::{Scheduler, TaskFailure};
use crate::store::{DEFAULT_KEY_COLUMN, MergeOptions, Row, merge_file};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const DAY_PLACEHOLDER: &str = "{day}";
pub const DEFAULT_CONCURRENCY: usize = 6;
pub const MEDIA_SEPARATOR: &str = " | ";
pub const COMBINED_MEDIA_COLUMN: &str = "Video_URLs";
pub const DEFAULT_READINGS_COLUMN: &str = "Scripture_Readings";
pub const DEFAULT_URL_COLUMN: &str = "URL";

/// Maps a day number to the page that holds it.
#[derive(Clone)]
pub struct DayUrl(Arc<dyn Fn(u32) -> String + Send + Sync>);

impl DayUrl {
    pub fn template(template: &str) -> Result<Self, PlanError> {
        if !template.contains(DAY_PLACEHOLDER) {
            return Err(PlanError::InvalidTemplate(template.to_string()));
        }
        let template = template.to_string();
        Ok(Self(Arc::new(move |day| {
            template.replace(DAY_PLACEHOLDER, &day.to_string())
        })))
    }

    pub fn from_fn(resolve: impl Fn(u32) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(resolve))
    }

    pub fn url(&self, day: u32) -> String {
        (self.0)(day)
    }
}

impl fmt::Debug for DayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DayUrl").field(&self.url(1)).finish()
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub concurrency: usize,
    pub url_for_day: DayUrl,
    pub fetch: FetchOptions,
}

impl ScrapeOptions {
    pub fn new(url_for_day: DayUrl) -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            url_for_day,
            fetch: FetchOptions::default(),
        }
    }
}

/// Day range and client settings shared by the populate flows.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub start_day: u32,
    pub end_day: u32,
    pub concurrency: usize,
    pub fetch: FetchOptions,
}

/// One plan: where its days live and which columns receive them.
#[derive(Debug, Clone)]
pub struct PlanTarget {
    pub key: String,
    pub url: DayUrl,
    pub readings_column: String,
    pub url_column: String,
    pub media_column: Option<String>,
    pub output: PathBuf,
}

impl PlanTarget {
    fn scrape_options(&self, run: &RunSettings) -> ScrapeOptions {
        ScrapeOptions {
            concurrency: run.concurrency,
            url_for_day: self.url.clone(),
            fetch: run.fetch.clone(),
        }
    }

}

/// Column names of a combined table. Each plan column carries the plan key,
/// uppercased, as a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedColumns {
    pub first_readings: String,
    pub second_readings: String,
    pub first_url: String,
    pub second_url: String,
    pub media: String,
}

impl CombinedColumns {
    pub fn for_plans(first: &PlanTarget, second: &PlanTarget) -> Self {
        Self {
            first_readings: prefixed(&first.key, &first.readings_column),
            second_readings: prefixed(&second.key, &second.readings_column),
            first_url: prefixed(&first.key, &first.url_column),
            second_url: prefixed(&second.key, &second.url_column),
            media: COMBINED_MEDIA_COLUMN.to_string(),
        }
    }

    /// Header order of a fresh combined file.
    pub fn ordered(&self) -> Vec<String> {
        vec![
            self.first_readings.clone(),
            self.second_readings.clone(),
            self.first_url.clone(),
            self.second_url.clone(),
            self.media.clone(),
        ]
    }
}

/// The `ot` / `nt` plans with the default readings and url columns.
impl Default for CombinedColumns {
    fn default() -> Self {
        Self {
            first_readings: prefixed("ot", DEFAULT_READINGS_COLUMN),
            second_readings: prefixed("nt", DEFAULT_READINGS_COLUMN),
            first_url: prefixed("ot", DEFAULT_URL_COLUMN),
            second_url: prefixed("nt", DEFAULT_URL_COLUMN),
            media: COMBINED_MEDIA_COLUMN.to_string(),
        }
    }
}

fn prefixed(key: &str, column: &str) -> String {
    format!("{}_{column}", key.to_ascii_uppercase())
}

pub fn validate_range(start_day: u32, end_day: u32) -> Result<(), PlanError> {
    if start_day < 1 || end_day < start_day {
        return Err(PlanError::InvalidRange {
            start: start_day,
            end: end_day,
        });
    }
    Ok(())
}

/// Fetches and extracts every day in `start_day..=end_day`. Per-day problems
/// land in the report; only invalid arguments fail the whole call, and they do
/// so before any request is made.
pub async fn scrape_range(
    start_day: u32,
    end_day: u32,
    options: &ScrapeOptions,
) -> Result<ScrapeReport, PlanError> {
    validate_range(start_day, end_day)?;
    let scheduler = Scheduler::new(options.concurrency)?;
    let fetcher = Fetcher::new(options.fetch.clone())?;

    info!(
        start_day,
        end_day,
        concurrency = scheduler.limit(),
        "scrape start"
    );

    let days = (start_day..=end_day)
        .map(|day| (day, options.url_for_day.url(day)))
        .collect::<Vec<_>>();
    let tasks = days
        .iter()
        .map(|(day, url)| {
            let fetcher = fetcher.clone();
            let day = *day;
            let url = url.clone();
            move || scrape_day(fetcher, day, url)
        })
        .collect::<Vec<_>>();

    let outcomes = scheduler.run(tasks).await;

    let mut report = ScrapeReport::default();
    for ((day, url), outcome) in days.into_iter().zip(outcomes) {
        match outcome {
            Ok(record) => report.records.push(record),
            Err(TaskFailure::Failed(failure)) => report.failures.push(failure),
            Err(TaskFailure::Panicked(message)) => report.failures.push(DayFailure::new(
                ErrorKind::Extraction,
                day,
                url,
                format!("task panicked: {message}"),
            )),
        }
    }

    report.records.sort_by_key(|record| record.day);
    report.failures.sort_by_key(|failure| failure.day);

    for failure in &report.failures {
        warn!(
            day = failure.day,
            url = %failure.url,
            kind = %failure.kind,
            error = %failure.cause,
            "day failed"
        );
    }
    info!(
        start_day,
        end_day,
        scraped = report.records.len(),
        failed = report.failures.len(),
        "scrape complete"
    );

    Ok(report)
}

async fn scrape_day(fetcher: Fetcher, day: u32, url: String) -> Result<DayRecord, DayFailure> {
    let body = fetcher
        .fetch(&url)
        .await
        .map_err(|err| DayFailure::from_fetch(day, &url, &err))?;

    let Some(extraction) = extract_references(&body) else {
        return Err(DayFailure::extraction(day, &url));
    };
    let media_links = extract_media(&body);

    Ok(DayRecord {
        day,
        references: extraction.references,
        media_links,
    })
}

/// Scrapes one plan and merges `Day`, readings and url columns into its CSV.
pub async fn populate_plan(plan: &PlanTarget, run: &RunSettings) -> Result<PopulateReport> {
    let report = scrape_range(run.start_day, run.end_day, &plan.scrape_options(run))
        .await
        .with_context(|| format!("scrape failed for plan {}", plan.key))?;

    let rows = report
        .records
        .iter()
        .map(|record| {
            let mut row = Row::new()
                .with(DEFAULT_KEY_COLUMN, record.day.to_string())
                .with(plan.readings_column.as_str(), record.readings())
                .with(plan.url_column.as_str(), plan.url.url(record.day));
            if let Some(column) = &plan.media_column {
                row.set(column.as_str(), record.media_links.join(MEDIA_SEPARATOR));
            }
            row
        })
        .collect::<Vec<_>>();

    let mut columns = vec![plan.readings_column.clone(), plan.url_column.clone()];
    columns.extend(plan.media_column.clone());
    let merge = merge_rows_into(&plan.output, rows, columns).await?;

    info!(
        plan = %plan.key,
        output = %plan.output.display(),
        scraped = report.records.len(),
        failed = report.failures.len(),
        "plan populated"
    );

    Ok(PopulateReport {
        plan: plan.key.clone(),
        output: plan.output.display().to_string(),
        start_day: run.start_day,
        end_day: run.end_day,
        scraped: report.records.len(),
        failures: report.failures,
        merge,
    })
}

/// Scrapes two plans over the same days and merges one row per day holding
/// both readings, both urls and the union of their video links.
pub async fn build_combined(
    first: &PlanTarget,
    second: &PlanTarget,
    output: &Path,
    run: &RunSettings,
) -> Result<PopulateReport> {
    let first_options = first.scrape_options(run);
    let second_options = second.scrape_options(run);
    let (first_report, second_report) = tokio::join!(
        scrape_range(run.start_day, run.end_day, &first_options),
        scrape_range(run.start_day, run.end_day, &second_options),
    );
    let first_report =
        first_report.with_context(|| format!("scrape failed for plan {}", first.key))?;
    let second_report =
        second_report.with_context(|| format!("scrape failed for plan {}", second.key))?;

    let columns = CombinedColumns::for_plans(first, second);
    let plans = [
        (first, &first_report, &columns.first_readings, &columns.first_url),
        (second, &second_report, &columns.second_readings, &columns.second_url),
    ];

    let rows = (run.start_day..=run.end_day)
        .map(|day| {
            let mut row = Row::new().with(DEFAULT_KEY_COLUMN, day.to_string());
            // A failed day leaves its readings cell alone so earlier runs survive.
            for (_, report, readings_column, _) in &plans {
                if let Some(record) = report.record(day) {
                    row.set(readings_column.as_str(), record.readings());
                }
            }
            for (plan, _, _, url_column) in &plans {
                row.set(url_column.as_str(), plan.url.url(day));
            }

            let records = plans
                .iter()
                .filter_map(|(_, report, _, _)| report.record(day))
                .collect::<Vec<_>>();
            if !records.is_empty() {
                let mut seen = HashSet::new();
                let videos = records
                    .iter()
                    .flat_map(|record| record.media_links.iter())
                    .filter(|link| seen.insert(link.as_str()))
                    .map(String::as_str)
                    .collect::<Vec<_>>();
                row.set(columns.media.as_str(), videos.join(MEDIA_SEPARATOR));
            }
            row
        })
        .collect::<Vec<_>>();

    let merge = merge_rows_into(output, rows, columns.ordered()).await?;

    let scraped = first_report.records.len() + second_report.records.len();
    let mut failures = first_report.failures;
    failures.extend(second_report.failures);

    info!(
        first = %first.key,
        second = %second.key,
        output = %output.display(),
        scraped,
        failed = failures.len(),
        "combined plan built"
    );

    Ok(PopulateReport {
        plan: format!("{}+{}", first.key, second.key),
        output: output.display().to_string(),
        start_day: run.start_day,
        end_day: run.end_day,
        scraped,
        failures,
        merge,
    })
}

async fn merge_rows_into(
    path: &Path,
    rows: Vec<Row>,
    columns: Vec<String>,
) -> Result<MergeSummary> {
    let target = path.to_path_buf();
    let options = MergeOptions {
        key_column: DEFAULT_KEY_COLUMN.to_string(),
        sort_numeric: true,
        columns,
    };

    tokio::task::spawn_blocking(move || merge_file(&target, &rows, &options))
        .await
        .context("merge task aborted")?
        .with_context(|| format!("failed to merge rows into {}", path.display()))
}
