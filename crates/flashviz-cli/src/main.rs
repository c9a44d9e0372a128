//! FlashViz CLI - browse and query data sources through the connector layer

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flashviz_connectors::{
    run_guarded, validate_query, Connector, ConnectorConfig, ConnectorFactory, Credential,
    TableRef, DEFAULT_SAMPLE_LIMIT,
};
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "flashviz")]
#[command(about = "Browse and query BigQuery, Snowflake, Databricks, Google Sheets and local files")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Connector token (see `flashviz connectors`)
    #[arg(short, long, global = true, env = "FLASHVIZ_CONNECTOR")]
    connector: Option<String>,

    /// JSON file with the connector's credential keys
    #[arg(long, global = true, env = "FLASHVIZ_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Credential key override, repeatable
    #[arg(long = "set", value_name = "KEY=VALUE", global = true, value_parser = parse_assignment)]
    set: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the connector tokens the factory knows
    Connectors,

    /// Check a query against the read-only admission rules
    Validate { sql: String },

    /// List catalogs (databases, datasets, workbooks or files)
    Catalogs,

    /// List schemas of a catalog
    Schemas { catalog: String },

    /// List tables of a catalog
    Tables {
        catalog: String,
        #[arg(short, long)]
        schema: Option<String>,
    },

    /// Show column names and types of a table
    Describe {
        catalog: String,
        table: String,
        #[arg(short, long)]
        schema: Option<String>,
    },

    /// Fetch the first rows of a table
    Sample {
        catalog: String,
        table: String,
        #[arg(short, long)]
        schema: Option<String>,
        #[arg(short, long, default_value_t = DEFAULT_SAMPLE_LIMIT)]
        limit: usize,
    },

    /// Run a read-only query
    Query { sql: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ConnectorConfig::from_env()?;
    let factory = ConnectorFactory::new(config);

    match &cli.command {
        Commands::Connectors => print_json(&factory.available()),
        Commands::Validate { sql } => print_json(&validate_query(sql)),
        command => {
            let token = cli
                .connector
                .as_deref()
                .context("--connector is required for this command")?;
            let credential = load_credential(cli.credentials.as_deref(), &cli.set)?;
            let mut connector = factory.create(token)?;

            let outcome = match connector.connect(&credential).await {
                Ok(()) => run(connector.as_mut(), command).await,
                Err(e) => Err(anyhow::Error::new(e).context(format!("cannot connect to {}", token))),
            };
            if let Err(e) = connector.close().await {
                warn!("Close failed: {}", e);
            }
            print_json(&outcome?)
        }
    }
}

async fn run(connector: &mut dyn Connector, command: &Commands) -> Result<serde_json::Value> {
    let value = match command {
        Commands::Catalogs => serde_json::to_value(connector.list_catalogs().await?)?,
        Commands::Schemas { catalog } => {
            serde_json::to_value(connector.list_schemas(catalog).await?)?
        }
        Commands::Tables { catalog, schema } => {
            serde_json::to_value(connector.list_tables(catalog, schema.as_deref()).await?)?
        }
        Commands::Describe {
            catalog,
            table,
            schema,
        } => {
            let table = table_ref(catalog, table, schema.as_deref());
            serde_json::to_value(connector.table_schema(&table).await?)?
        }
        Commands::Sample {
            catalog,
            table,
            schema,
            limit,
        } => {
            let table = table_ref(catalog, table, schema.as_deref());
            let sample = connector.sample_rows(&table, *limit).await?;
            info!("Sampled {} rows from {}", sample.num_rows(), table);
            serde_json::to_value(sample)?
        }
        Commands::Query { sql } => {
            let result = run_guarded(connector, sql).await?;
            info!("Query returned {} rows", result.num_rows());
            serde_json::to_value(result)?
        }
        Commands::Connectors | Commands::Validate { .. } => {
            anyhow::bail!("command does not use a connector")
        }
    };
    Ok(value)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn table_ref(catalog: &str, table: &str, schema: Option<&str>) -> TableRef {
    let table = TableRef::new(catalog, table);
    match schema {
        Some(schema) => table.with_schema(schema),
        None => table,
    }
}

/// Credential keys from the JSON file, then `--set` overrides in order.
fn load_credential(path: Option<&Path>, overrides: &[(String, String)]) -> Result<Credential> {
    let mut credential = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading credentials from {}", path.display()))?;
            Credential::from_json(&text)
                .with_context(|| format!("parsing credentials from {}", path.display()))?
        }
        None => Credential::new(),
    };
    for (key, value) in overrides {
        credential.insert(key.clone(), value.clone());
    }
    Ok(credential)
}

fn parse_assignment(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
