//! examsync CLI tool
//!
//! Command-line interface for running and poking at the test authoring store.
//!
//! ## Commands
//!
//! - `serve`: Run the HTTP API until Ctrl-C
//! - `init-config`: Write a config file with every setting at its default
//! - `create-test <title>`: Create an empty draft Test owned by `--user`
//! - `list`: List the Tests owned by `--user`
//! - `show <id>`: Print the canonical tree of one Test as JSON
//! - `sync <id> <file>`: Reconcile a Test's sections against a JSON snapshot file, exactly as
//!   `PUT /api/test/{id}/sections` would
//!
//! Every command reads `--config` (default `examsync.toml`, defaults used if missing). The
//! `--database` and `--port` flags override the file.

use clap::{Parser, Subcommand};
use examsync_core::{
    config::{ServiceConfig, DEFAULT_CONFIG_FILE},
    db::DbConnection,
    payload::{NewTest, Snapshot},
    properties::{NodeId, UserId},
    server::ApiServer,
    SyncError,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "examsync")]
#[command(author, version, about = "Reconcile authored test trees into SQLite", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// SQLite database file (overrides the config file)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Write a configuration file holding the defaults
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Create an empty draft Test
    CreateTest {
        title: String,

        /// Owner of the new Test
        #[arg(short, long)]
        user: String,

        #[arg(long)]
        description: Option<String>,

        /// Total duration in minutes
        #[arg(long)]
        duration: Option<i64>,
    },

    /// List a user's Tests
    List {
        #[arg(short, long)]
        user: String,
    },

    /// Print the canonical tree of a Test
    Show {
        id: String,

        #[arg(short, long)]
        user: String,
    },

    /// Reconcile a Test's sections against a snapshot file
    Sync {
        id: String,

        /// JSON file shaped like the body of `PUT /api/test/{id}/sections`
        snapshot: PathBuf,

        #[arg(short, long)]
        user: String,

        /// Only print the summary, not the resulting tree
        #[arg(short, long)]
        quiet: bool,
    },
}

async fn open_db(config: &ServiceConfig) -> Result<DbConnection, SyncError> {
    DbConnection::open(&config.database, config.busy_timeout()).await
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::InitConfig { force } = cli.command {
        if cli.config.exists() && !force {
            eprintln!(
                "Error: {} already exists (use --force to overwrite)",
                cli.config.display()
            );
            std::process::exit(1);
        }
        let mut config = ServiceConfig::default();
        if let Some(database) = cli.database {
            config.database = database;
        }
        config.write(&cli.config)?;
        println!("Config written: {}", cli.config.display());
        return Ok(());
    }

    let mut config = ServiceConfig::load(&cli.config)?;
    if let Some(database) = cli.database {
        config.database = database;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Commands::InitConfig { .. } => Ok(()),

            Commands::Serve { port } => {
                if let Some(port) = port {
                    config.port = port;
                }
                let db = open_db(&config).await?;
                println!("\nexamsync API running at http://{}", config.socket_addr());
                println!("Database: {}\n", config.database.display());
                ApiServer::new(config, db)
                    .serve(async {
                        if let Err(e) = tokio::signal::ctrl_c().await {
                            tracing::error!("Failed to listen for Ctrl-C: {e}");
                        }
                        tracing::info!("Received Ctrl-C, shutting down...");
                    })
                    .await
            }

            Commands::CreateTest {
                title,
                user,
                description,
                duration,
            } => {
                let db = open_db(&config).await?;
                let mut new_test = NewTest::titled(title);
                new_test.description = description;
                new_test.total_duration = duration;
                let tree = db.create_test(&UserId::new(user)?, &new_test).await?;
                println!("Created test {} ({})", tree.test.id, tree.test.title);
                Ok(())
            }

            Commands::List { user } => {
                let db = open_db(&config).await?;
                let tests = db.list_tests(&UserId::new(user)?).await?;
                if tests.is_empty() {
                    println!("No tests.");
                }
                for test in tests {
                    println!(
                        "{}  {:<9}  rev {:<4}  {}",
                        test.id,
                        test.status.as_str(),
                        test.revision,
                        test.title
                    );
                }
                Ok(())
            }

            Commands::Show { id, user } => {
                let db = open_db(&config).await?;
                let tree = db
                    .get_test_tree(&UserId::new(user)?, NodeId::try_from(id.as_str())?)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&tree)?);
                Ok(())
            }

            Commands::Sync {
                id,
                snapshot,
                user,
                quiet,
            } => {
                let bytes = std::fs::read(&snapshot)?;
                let snapshot = Snapshot::from_json(&bytes)?;
                let db = open_db(&config).await?;
                let outcome = db
                    .sync_sections(&UserId::new(user)?, NodeId::try_from(id.as_str())?, &snapshot)
                    .await?;

                println!("\n=== Sync Results ===");
                for (level, counts) in [
                    ("Sections", outcome.summary.sections),
                    ("Questions", outcome.summary.questions),
                    ("Options", outcome.summary.options),
                ] {
                    println!(
                        "{level}: {} created, {} updated, {} unchanged, {} deleted",
                        counts.created, counts.updated, counts.unchanged, counts.deleted
                    );
                }
                println!("Revision: {}", outcome.tree.test.revision);
                if !quiet {
                    println!("\n{}", serde_json::to_string_pretty(&outcome.tree)?);
                }
                Ok(())
            }
        }
    })?;

    Ok(())
}
