use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use planscrape::catalog::{load_catalog, scripture_index};
use planscrape::config::{RunOverrides, load_config, load_config_or_default};
use planscrape::error::{ErrorKind, FetchError, MergeError, PlanError};
use planscrape::pipeline::{DayUrl, ScrapeOptions, build_combined, populate_plan, scrape_range};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "planscrape", about = "Day-by-day reading plan scraper")]
struct Cli {
    #[arg(long, default_value = "configs/plans.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct RangeArgs {
    #[arg(long)]
    start: Option<u32>,
    #[arg(long)]
    end: Option<u32>,
    #[arg(long)]
    concurrency: Option<usize>,
}

impl From<RangeArgs> for RunOverrides {
    fn from(args: RangeArgs) -> Self {
        Self {
            start_day: args.start,
            end_day: args.end,
            concurrency: args.concurrency,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scrape a day range and print the report as JSON.
    Scrape {
        #[arg(long, conflicts_with = "plan")]
        template: Option<String>,
        #[arg(long)]
        plan: Option<String>,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Scrape plans and merge them into their CSV files.
    Populate {
        #[arg(long)]
        plan: Option<String>,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Scrape the paired plans into the combined CSV.
    Combined {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Print the combined CSV as day entries plus a scripture index.
    Catalog {
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    Validate,
}

#[derive(Serialize)]
struct CatalogOutput {
    days: Vec<planscrape::catalog::PlanDay>,
    scripture_index: Vec<planscrape::catalog::IndexEntry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!(kind = %failure_kind(&err), "command failed");
        return Err(err);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Scrape {
            template,
            plan,
            range,
        } => {
            let loaded = load_config_or_default(&cli.config)?;
            let run = loaded.run_settings(range.into())?;
            let url_for_day = match (template, plan) {
                (Some(template), _) => DayUrl::template(&template)?,
                (None, Some(key)) => loaded.plan_target(&key)?.url,
                (None, None) => bail!("either --template or --plan must be provided"),
            };

            let report = scrape_range(
                run.start_day,
                run.end_day,
                &ScrapeOptions {
                    concurrency: run.concurrency,
                    url_for_day,
                    fetch: run.fetch,
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Populate { plan, range } => {
            let loaded = load_config(&cli.config)?;
            let run = loaded.run_settings(range.into())?;
            let keys = match plan {
                Some(key) => vec![key],
                None => loaded
                    .enabled_plans()
                    .into_iter()
                    .map(|plan| plan.key.clone())
                    .collect(),
            };
            if keys.is_empty() {
                bail!("no enabled plans in {}", cli.config.display());
            }

            for key in keys {
                let target = loaded.plan_target(&key)?;
                let report = populate_plan(&target, &run).await?;
                info!(
                    plan = %report.plan,
                    output = %report.output,
                    scraped = report.scraped,
                    failed = report.failures.len(),
                    inserted = report.merge.inserted,
                    updated = report.merge.updated,
                    unchanged = report.merge.unchanged,
                    "plan summary"
                );
            }
        }
        Commands::Combined { range } => {
            let loaded = load_config(&cli.config)?;
            let run = loaded.run_settings(range.into())?;
            let Some(combined) = loaded.config.combined.clone() else {
                bail!("no [combined] section in {}", cli.config.display());
            };
            let output = loaded
                .combined_output()?
                .context("combined output path missing")?;

            let first = loaded.plan_target(&combined.first)?;
            let second = loaded.plan_target(&combined.second)?;
            let report = build_combined(&first, &second, &output, &run).await?;
            info!(
                plans = %report.plan,
                output = %report.output,
                scraped = report.scraped,
                failed = report.failures.len(),
                inserted = report.merge.inserted,
                updated = report.merge.updated,
                unchanged = report.merge.unchanged,
                "combined summary"
            );
        }
        Commands::Catalog { csv } => {
            let loaded = load_config_or_default(&cli.config)?;
            let path = match csv {
                Some(path) => path,
                None => loaded
                    .combined_output()?
                    .context("pass --csv or configure [combined].output")?,
            };
            let days = load_catalog(&path, &loaded.combined_columns()?)?;
            let output = CatalogOutput {
                scripture_index: scripture_index(&days),
                days,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Validate => {
            let loaded = load_config(&cli.config)?;
            for plan in &loaded.config.plans {
                match &plan.name {
                    Some(name) => println!("OK: {} - {name} ({})", plan.key, loaded.path.display()),
                    None => println!("OK: {} ({})", plan.key, loaded.path.display()),
                }
            }
            if let Some(combined) = &loaded.config.combined {
                println!("OK: combined {}+{}", combined.first, combined.second);
            }
        }
    }

    Ok(())
}

/// The kind of the first typed error in the chain. Config and argument
/// problems carry no typed error and count as validation failures.
fn failure_kind(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<PlanError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<FetchError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<MergeError>() {
            return err.kind();
        }
    }
    ErrorKind::Validation
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
