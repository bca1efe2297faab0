//! Relgraph CLI - maintenance commands for relgraph databases

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use relgraph::config::{load_config, RelgraphConfig};
use relgraph::migrate::{migrate_database, validate_database};
use relgraph::storage::{ConnectionTarget, Executor};
use relgraph::ui::{self, Icons, Spinner};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "relgraph")]
#[command(version)]
#[command(about = "Graph-to-relational persistence engine")]
#[command(long_about = r#"
Relgraph stores a typed object graph in a relational database.

Example usage:
  relgraph migrate sqlite:///city.db
  relgraph stats sqlite:///city.db --format json
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file (defaults to relgraph.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade a database written with the legacy layout
    Migrate {
        /// Connection string, e.g. sqlite:///path/to/db
        url: Option<String>,
    },

    /// Show row counts per table
    Stats {
        /// Connection string, e.g. sqlite:///path/to/db
        url: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?.unwrap_or_default();

    match cli.command {
        Commands::Migrate { url } => {
            let url = database_url(url, &config)?;
            let options = config.session_options()?;
            ui::header(&format!("Migrating {}", url));

            let started = Instant::now();
            let spinner = Spinner::new("Detecting layout");
            let result = migrate_database(&url, &options, |step| spinner.set_message(step));
            spinner.finish_and_clear();
            let report = result.with_context(|| format!("migration of {} failed", url))?;

            ui::success(&format!("Migrated from the {} layout", report.from));
            ui::summary_row("Entities:", &report.entities.to_string());
            ui::summary_row("Relationships:", &report.relationships.to_string());
            ui::summary_row("Data tables:", &report.data_tables.to_string());
            ui::timing(started.elapsed());

            if let Some(ontology) = config.load_ontology()? {
                let unknown = validate_database(&url, &options, &ontology)?;
                if unknown.is_empty() {
                    ui::success("All stored classes and relationships are declared");
                }
                for name in &unknown {
                    ui::warn(&format!("{} is not declared in the ontology", name));
                }
            }
        }

        Commands::Stats { url, format } => {
            let url = database_url(url, &config)?;
            let options = config.session_options()?;
            let target = ConnectionTarget::parse(&url)?;
            let mut executor = Executor::open(&target, options.busy_timeout)?;
            let stats = executor.stats()?;
            executor.close()?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Table => {
                    ui::status(Icons::DATABASE, "Database", &target.to_string());
                    ui::status(Icons::PACKAGE, "Entities", &stats.entities.to_string());
                    ui::status(Icons::LINK, "Relationships", &stats.relationships.to_string());
                    if stats.tables.is_empty() {
                        ui::warn("No relgraph tables found");
                    } else {
                        ui::section(&format!("{} Tables", Icons::STATS));
                        println!("{}", ui::stats_table(&stats));
                    }
                }
            }
        }
    }

    Ok(())
}

fn database_url(url: Option<String>, config: &RelgraphConfig) -> anyhow::Result<String> {
    url.or_else(|| config.database.clone())
        .context("no database given; pass a URL or set `database` in relgraph.toml")
}
