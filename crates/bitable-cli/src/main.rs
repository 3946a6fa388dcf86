//! Bitable CLI - command-line access to Feishu Bitable apps

use anyhow::{bail, Context};
use bitable_client::{
    field_type, BitableClient, Config, ExecutorConfig, ParentType, RecordFields, RetryConfig,
    TableField,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bitable")]
#[command(about = "Work with Feishu Bitable tables, records and attachments")]
#[command(version)]
struct Args {
    /// App ID used for the tenant token exchange
    #[arg(long, env = "FEISHU_APP_ID")]
    app_id: String,

    /// App secret used for the tenant token exchange
    #[arg(long, env = "FEISHU_APP_SECRET", hide_env_values = true)]
    app_secret: String,

    /// Open API base URL
    #[arg(long, default_value = bitable_client::DEFAULT_BASE_URL, env = "FEISHU_BASE_URL")]
    base_url: String,

    /// JSON file with `read`, `write` and `retry` quota overrides
    #[arg(long, env = "BITABLE_QUOTAS")]
    quotas: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "BITABLE_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tables of an app
    Tables {
        /// App token
        #[arg(long)]
        app: String,
    },

    /// Show the field schema of one or more tables
    Fields {
        /// App token
        #[arg(long)]
        app: String,

        /// Table ID (repeatable)
        #[arg(long = "table", required = true)]
        tables: Vec<String>,
    },

    /// Create a table
    CreateTable {
        /// App token
        #[arg(long)]
        app: String,

        /// Table name
        #[arg(long)]
        name: String,

        /// Column as NAME:TYPE, TYPE being a code or text/number/select/date/checkbox/phone/attachment
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<TableField>,
    },

    /// Insert records given as JSON objects
    Insert {
        /// App token
        #[arg(long)]
        app: String,

        /// Table ID
        #[arg(long)]
        table: String,

        /// Record as a JSON object of field name to value (repeatable)
        #[arg(long = "record", value_parser = parse_record)]
        records: Vec<RecordFields>,

        /// File holding a JSON array of records
        #[arg(long)]
        from_file: Option<PathBuf>,

        /// Skip the schema check
        #[arg(long)]
        no_validate: bool,
    },

    /// Upload a local file and print its file token
    Upload {
        /// File to upload
        path: PathBuf,

        /// Parent type (bitable_image, bitable_file, explorer, ...)
        #[arg(long, default_value = "bitable_image")]
        parent_type: ParentType,

        /// Parent node, usually the app token
        #[arg(long)]
        parent_node: String,
    },
}

/// Quota overrides loaded from `--quotas`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuotaFile {
    read: Option<ExecutorConfig>,
    write: Option<ExecutorConfig>,
    retry: Option<RetryConfig>,
}

fn load_quotas(path: &Path) -> anyhow::Result<QuotaFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading quota file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing quota file {}", path.display()))
}

fn parse_field(spec: &str) -> anyhow::Result<TableField> {
    let (name, kind) = spec
        .rsplit_once(':')
        .with_context(|| format!("expected NAME:TYPE, got {spec:?}"))?;
    if name.is_empty() {
        bail!("empty field name in {spec:?}");
    }

    let code = match kind.to_ascii_lowercase().as_str() {
        "text" => field_type::TEXT,
        "number" => field_type::NUMBER,
        "select" => field_type::SINGLE_SELECT,
        "date" => field_type::DATE,
        "checkbox" => field_type::CHECKBOX,
        "phone" => field_type::PHONE,
        "attachment" => field_type::ATTACHMENT,
        other => other
            .parse()
            .with_context(|| format!("unknown field type {other:?}"))?,
    };
    Ok(TableField::new(name, code))
}

fn parse_record(text: &str) -> anyhow::Result<RecordFields> {
    serde_json::from_str(text)
        .context("record must be a JSON object of text, number, boolean or attachment values")
}

fn load_records(path: &Path) -> anyhow::Result<Vec<RecordFields>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading records from {}", path.display()))?;
    serde_json::from_str(&text).context("records file must be a JSON array of record objects")
}

fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::new(&args.base_url).with_credentials(&args.app_id, &args.app_secret);

    if let Some(path) = &args.quotas {
        let quotas = load_quotas(path)?;
        if let Some(read) = quotas.read {
            config = config.with_read_quota(read);
        }
        if let Some(write) = quotas.write {
            config = config.with_write_quota(write);
        }
        if let Some(retry) = quotas.retry {
            config = config.with_retry(retry);
        }
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Setup logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("bitable_client={0},bitable={0}", log_level).into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = build_config(&args)?;
    tracing::debug!(base_url = %config.base_url, "client configured");
    let client = BitableClient::new(config).context("creating client")?;

    match args.command {
        Command::Tables { app } => {
            let mut tables: Vec<_> = client.list_tables(&app).await?.into_values().collect();
            tables.sort_by(|a, b| a.name.cmp(&b.name));
            println!("{}", serde_json::to_string_pretty(&tables)?);
        }

        Command::Fields { app, tables } => {
            let ids: Vec<&str> = tables.iter().map(String::as_str).collect();
            let schemas = client.list_fields_many(&app, &ids).await?;
            for (table, schema) in tables.iter().zip(schemas) {
                match schema {
                    Ok(fields) => {
                        println!("# {table}");
                        println!("{}", serde_json::to_string_pretty(&fields)?);
                    }
                    Err(e) => tracing::error!(table = %table, error = %e, "failed to fetch fields"),
                }
            }
        }

        Command::CreateTable { app, name, fields } => {
            let created = client.create_table(&app, &name, &fields).await?;
            println!("{}", created.table_id);
        }

        Command::Insert {
            app,
            table,
            mut records,
            from_file,
            no_validate,
        } => {
            if let Some(path) = from_file {
                records.extend(load_records(&path)?);
            }
            if records.is_empty() {
                bail!("no records given; use --record or --from-file");
            }

            let created = if no_validate {
                client.batch_create_records(&app, &table, &records).await?
            } else {
                client.insert_records(&app, &table, &records).await?
            };
            for record in created {
                println!("{}", record.record_id);
            }
        }

        Command::Upload {
            path,
            parent_type,
            parent_node,
        } => {
            let file_token = client
                .upload_file(&path, &parent_type, &parent_node)
                .await
                .with_context(|| format!("uploading {}", path.display()))?;
            println!("{file_token}");
        }
    }

    Ok(())
}
