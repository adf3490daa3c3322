//! # formfill CLI
//!
//! ## Usage
//!
//! ```bash
//! formfill --config ./config/formfill.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `formfill init` | Create the upload directory and the database table |
//! | `formfill serve` | Start the HTTP server |
//! | `formfill forms` | List templates |
//! | `formfill upload <path>` | Copy a local file into the template store |
//! | `formfill fill <name> --field k=v` | Fill a template |
//! | `formfill filled` | Print the fill log as JSON |
//!
//! `UPLOAD_DIR`, `DB_FILE` and `PORT` override the config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use formfill::config::{self, Config};
use formfill::fetch::HttpImageFetcher;
use formfill::models::{FieldMap, FillRequest};
use formfill::service::FormService;
use formfill::{db, migrate, server};

/// formfill — upload spreadsheet templates and fill their placeholders.
#[derive(Parser)]
#[command(name = "formfill", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "./config/formfill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the upload directory and the fill record table.
    ///
    /// Idempotent.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// List templates in the upload directory.
    Forms,

    /// Copy a local template into the upload directory.
    Upload {
        /// File to upload; its file name becomes the template name.
        path: PathBuf,
    },

    /// Fill a template and record the operation.
    Fill {
        /// Template file name in the upload directory.
        filename: String,

        /// Placeholder values as `key=value` pairs.
        #[arg(long = "field", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
    },

    /// Print all fill records, newest first, as JSON.
    Filled,
}

/// Parse a `key=value` pair for `--field` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("formfill=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_service(cfg: &Config) -> anyhow::Result<FormService> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    let fetcher = Arc::new(HttpImageFetcher::new(&cfg.fetch)?);
    Ok(FormService::new(Arc::new(cfg.clone()), pool, fetcher).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config_with_env(&cli.config)?;

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(&cfg.storage.upload_dir).with_context(|| {
                format!(
                    "Failed to create upload directory: {}",
                    cfg.storage.upload_dir.display()
                )
            })?;
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Forms => {
            let service = open_service(&cfg).await?;
            for name in service.list_templates().await? {
                println!("{}", name);
            }
        }
        Commands::Upload { path } => {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("Not a file path: {}", path.display()))?
                .to_string();
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let service = open_service(&cfg).await?;
            let outcome = service.upload(&name, &bytes).await?;
            println!("Uploaded {} -> {}", outcome.filename, outcome.url);
        }
        Commands::Fill { filename, fields } => {
            let fields: FieldMap = fields
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            let service = open_service(&cfg).await?;
            let outcome = service.fill(&FillRequest { filename, fields }).await?;
            println!("Form filled: {}", outcome.url);
        }
        Commands::Filled => {
            let service = open_service(&cfg).await?;
            let records = service.filled().await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}
