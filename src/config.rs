use crate::fetch::FetchOptions;
use crate::pipeline::{
    CombinedColumns, DAY_PLACEHOLDER, DEFAULT_CONCURRENCY, DEFAULT_READINGS_COLUMN, DEFAULT_URL_COLUMN, DayUrl,
    PlanTarget, RunSettings, validate_range,
};
use crate::store::DEFAULT_KEY_COLUMN;
use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: PlanConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlanConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub range: RangeConfig,
    #[serde(default)]
    pub plans: Vec<PlanEntry>,
    #[serde(default)]
    pub combined: Option<CombinedConfig>,
}

impl PlanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fetch.concurrency < 1 {
            bail!("fetch.concurrency must be at least 1");
        }
        if self.fetch.timeout_secs == 0 {
            bail!("fetch.timeout_secs must be greater than zero");
        }
        validate_range(self.range.start_day, self.range.end_day).context("invalid [range]")?;

        let mut keys = HashSet::new();
        for plan in &self.plans {
            if plan.key.trim().is_empty() {
                bail!("plans.key must not be empty");
            }
            if !keys.insert(plan.key.as_str()) {
                bail!("duplicate plan key: {}", plan.key);
            }
            if !plan.url_template.contains(DAY_PLACEHOLDER) {
                bail!(
                    "plan {} url_template must contain {DAY_PLACEHOLDER}",
                    plan.key
                );
            }
            if plan.output.as_os_str().is_empty() {
                bail!("plan {} output must not be empty", plan.key);
            }

            let mut columns = vec![plan.readings_column.as_str(), plan.url_column.as_str()];
            columns.extend(plan.media_column.as_deref());
            let mut seen = HashSet::new();
            for column in columns {
                if column.trim().is_empty() || column == DEFAULT_KEY_COLUMN {
                    bail!("plan {} has an invalid column name: {column:?}", plan.key);
                }
                if !seen.insert(column) {
                    bail!("plan {} maps two fields to column {column}", plan.key);
                }
            }
        }

        if let Some(combined) = &self.combined {
            if combined.output.as_os_str().is_empty() {
                bail!("combined.output must not be empty");
            }
            if combined.first == combined.second {
                bail!("combined.first and combined.second must differ");
            }
            for key in [&combined.first, &combined.second] {
                if self.plan(key).is_none() {
                    bail!("combined references unknown plan: {key}");
                }
            }
        }

        Ok(())
    }

    pub fn plan(&self, key: &str) -> Option<&PlanEntry> {
        self.plans.iter().find(|plan| plan.key == key)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            user_agent: None,
            headers: BTreeMap::new(),
            concurrency: default_concurrency(),
        }
    }
}

impl FetchConfig {
    pub fn fetch_options(&self) -> FetchOptions {
        let mut headers = self.headers.clone();
        if let Some(agent) = &self.user_agent {
            headers.insert("User-Agent".to_string(), agent.clone());
        }
        FetchOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            headers,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RangeConfig {
    #[serde(default = "default_start_day")]
    pub start_day: u32,
    #[serde(default = "default_end_day")]
    pub end_day: u32,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            start_day: default_start_day(),
            end_day: default_end_day(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanEntry {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    pub url_template: String,
    pub output: PathBuf,
    #[serde(default = "default_readings_column")]
    pub readings_column: String,
    #[serde(default = "default_url_column")]
    pub url_column: String,
    #[serde(default)]
    pub media_column: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CombinedConfig {
    pub output: PathBuf,
    #[serde(default = "default_first_plan")]
    pub first: String,
    #[serde(default = "default_second_plan")]
    pub second: String,
}

/// Command-line overrides applied on top of the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOverrides {
    pub start_day: Option<u32>,
    pub end_day: Option<u32>,
    pub concurrency: Option<usize>,
}

impl LoadedConfig {
    pub fn run_settings(&self, overrides: RunOverrides) -> Result<RunSettings> {
        let settings = RunSettings {
            start_day: overrides.start_day.unwrap_or(self.config.range.start_day),
            end_day: overrides.end_day.unwrap_or(self.config.range.end_day),
            concurrency: overrides
                .concurrency
                .unwrap_or(self.config.fetch.concurrency),
            fetch: self.config.fetch.fetch_options(),
        };
        validate_range(settings.start_day, settings.end_day)?;
        if settings.concurrency < 1 {
            bail!("concurrency must be at least 1");
        }
        Ok(settings)
    }

    pub fn plan_target(&self, key: &str) -> Result<PlanTarget> {
        let entry = self
            .config
            .plan(key)
            .ok_or_else(|| anyhow!("no plan named {key} in {}", self.path.display()))?;
        Ok(PlanTarget {
            key: entry.key.clone(),
            url: DayUrl::template(&entry.url_template)?,
            readings_column: entry.readings_column.clone(),
            url_column: entry.url_column.clone(),
            media_column: entry.media_column.clone(),
            output: resolve_path(&self.path, &entry.output)?,
        })
    }

    pub fn enabled_plans(&self) -> Vec<&PlanEntry> {
        self.config
            .plans
            .iter()
            .filter(|plan| plan.enabled)
            .collect()
    }

    /// Column names of the combined table; the `ot` / `nt` defaults when the
    /// file has no `[combined]` section.
    pub fn combined_columns(&self) -> Result<CombinedColumns> {
        let Some(combined) = &self.config.combined else {
            return Ok(CombinedColumns::default());
        };
        Ok(CombinedColumns::for_plans(
            &self.plan_target(&combined.first)?,
            &self.plan_target(&combined.second)?,
        ))
    }

    pub fn combined_output(&self) -> Result<Option<PathBuf>> {
        self.config
            .combined
            .as_ref()
            .map(|combined| resolve_path(&self.path, &combined.output))
            .transpose()
    }
}

pub fn load_config(config_path: &Path) -> Result<LoadedConfig> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read plan config: {}", config_path.display()))?;
    let config: PlanConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse toml in {}", config_path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid plan config {}", config_path.display()))?;
    Ok(LoadedConfig {
        path: config_path.to_path_buf(),
        config,
    })
}

/// Like [`load_config`], but a missing file yields the built-in defaults with
/// no plans.
pub fn load_config_or_default(config_path: &Path) -> Result<LoadedConfig> {
    if !config_path.exists() {
        return Ok(LoadedConfig {
            path: config_path.to_path_buf(),
            config: PlanConfig::default(),
        });
    }
    load_config(config_path)
}

pub fn resolve_path(base_config_path: &Path, maybe_relative: &Path) -> Result<PathBuf> {
    if maybe_relative.is_absolute() {
        return Ok(maybe_relative.to_path_buf());
    }

    let parent = base_config_path.parent().ok_or_else(|| {
        anyhow!(
            "plan config has no parent directory: {}",
            base_config_path.display()
        )
    })?;

    Ok(parent.join(maybe_relative))
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_start_day() -> u32 {
    1
}

fn default_end_day() -> u32 {
    365
}

fn default_readings_column() -> String {
    DEFAULT_READINGS_COLUMN.to_string()
}

fn default_url_column() -> String {
    DEFAULT_URL_COLUMN.to_string()
}

fn default_first_plan() -> String {
    "ot".to_string()
}

fn default_second_plan() -> String {
    "nt".to_string()
}
