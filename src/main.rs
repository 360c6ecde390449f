use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use college_reports::config::Config;
use college_reports::dataset::Dataset;
use college_reports::engine::{run_and_store, AnalysisOptions};
use college_reports::models::{Period, ReportKind};
use college_reports::report;
use college_reports::store::{MemoryReportStore, PgReportStore, ReportStore, StoredReport};

#[derive(Parser)]
#[command(name = "college-reports")]
#[command(about = "Analyzes college exports for schedule, topic, grade, attendance and homework problems", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the report history schema
    InitDb,
    /// Analyze a CSV or JSON export
    Analyze {
        #[arg(long)]
        input: PathBuf,
        /// schedule, topics, students, attendance, homework_check or homework_submission
        #[arg(long)]
        report_type: ReportKind,
        /// month, week or day (homework check only)
        #[arg(long, default_value = "month")]
        period: Period,
        /// Field delimiter; detected from the header line when omitted
        #[arg(long)]
        delimiter: Option<char>,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Keep the result in the report history
        #[arg(long)]
        store: bool,
        #[arg(long)]
        created_by: Option<String>,
    },
    /// List stored reports, newest first
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print one stored report
    Show {
        id: Uuid,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
    },
    /// Remove a stored report
    Delete { id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::InitDb => {
            let store = connect(&config).await?;
            store.init().await.context("failed to apply migrations")?;
            println!("Schema ready.");
        }
        Commands::Analyze {
            input,
            report_type,
            period,
            delimiter,
            format,
            out,
            store,
            created_by,
        } => {
            let delimiter = match delimiter {
                Some(c) if c.is_ascii() => Some(c as u8),
                Some(c) => bail!("delimiter '{c}' is not a single-byte character"),
                None => None,
            };
            let dataset = Dataset::from_path(&input, delimiter)
                .with_context(|| format!("failed to read {}", input.display()))?;
            info!(
                input = %input.display(),
                rows = dataset.row_count(),
                columns = dataset.columns().len(),
                "dataset loaded"
            );

            let history: Box<dyn ReportStore> = if store {
                Box::new(connect(&config).await?)
            } else {
                Box::new(MemoryReportStore::default())
            };
            let filename = input
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| input.display().to_string());

            let report = run_and_store(
                history.as_ref(),
                &dataset,
                report_type,
                &AnalysisOptions { period },
                &filename,
                created_by.as_deref(),
            )
            .await?;

            let rendered = render(&report, format)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
            if store {
                println!("Stored as {}.", report.id);
            }
        }
        Commands::History { limit } => {
            let store = connect(&config).await?;
            let entries = store.list(limit.unwrap_or(config.history_limit)).await?;

            if entries.is_empty() {
                println!("No reports stored yet.");
                return Ok(());
            }

            for entry in entries {
                println!(
                    "- {} {} [{}] {}: {}",
                    entry.id,
                    entry.generated_at.format("%Y-%m-%d %H:%M"),
                    entry.report_label,
                    entry.filename,
                    entry.summary
                );
            }
        }
        Commands::Show { id, format } => {
            let store = connect(&config).await?;
            let Some(report) = store.fetch(id).await? else {
                bail!("report {id} not found");
            };
            print!("{}", render(&report, format)?);
        }
        Commands::Delete { id } => {
            let store = connect(&config).await?;
            if store.delete(id).await? {
                println!("Report {id} deleted.");
            } else {
                bail!("report {id} not found");
            }
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<PgReportStore> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to use the report history")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(PgReportStore::new(pool))
}

fn render(report: &StoredReport, format: Format) -> anyhow::Result<String> {
    Ok(match format {
        Format::Markdown => report::render_stored(report),
        Format::Json => {
            let mut json = serde_json::to_string_pretty(report)?;
            json.push('\n');
            json
        }
    })
}
