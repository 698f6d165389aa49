use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use service_supervisor::{StorageError, Supervisor, SupervisorConfig, SupervisorError};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "supervisor")]
#[command(about = "Self-healing service supervisor and SQLite store maintenance")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, global = true, env = "SUPERVISOR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise the configured stores until Ctrl-C
    Run,

    /// Run one health cycle and print the status document
    Status,

    /// Run a full integrity check on a store (default: configured stores)
    Integrity {
        /// Database file
        path: Option<PathBuf>,
    },

    /// Repair a store in place, keeping a pre-repair copy
    Repair {
        /// Database file
        path: PathBuf,
    },

    /// Create a checksummed backup of a store
    Backup {
        /// Database file (default: configured stores)
        path: Option<PathBuf>,

        /// Backup directory (overrides configuration)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Verify a backup against its checksum file
    Verify {
        /// Backup file
        backup: PathBuf,
    },

    /// Restore a store from a verified backup
    Restore {
        /// Backup file
        backup: PathBuf,

        /// Store to overwrite
        target: PathBuf,
    },

    /// Delete all but the newest backups of a store
    Prune {
        /// Database file whose backups are pruned
        path: PathBuf,

        /// Backups to keep (overrides configuration)
        #[arg(short, long)]
        keep: Option<usize>,

        /// Backup directory (overrides configuration)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, cli.json_logs);

    let mut config = SupervisorConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Status => status(config).await,
        Commands::Integrity { path } => integrity(&config, path),
        Commands::Repair { path } => {
            let supervisor = Supervisor::new(config)?;
            let report = supervisor.repair(&path)?;
            println!("✅ Repaired {} ({})", path.display(), report.method.description());
            println!("   Pre-repair copy: {}", report.backup_path.display());
            Ok(())
        }
        Commands::Backup { path, dir } => {
            if let Some(dir) = dir {
                config.backup_dir = dir;
            }
            let stores = store_paths(&config, path)?;
            let supervisor = Supervisor::new(config)?;
            for store in stores {
                let record = supervisor.backup(&store)?;
                println!("✅ {} → {}", store.display(), record.path.display());
                match record.checksum {
                    Some(checksum) => println!("   sha256: {}", checksum),
                    None => println!("   ⚠️  checksum could not be written"),
                }
            }
            Ok(())
        }
        Commands::Verify { backup } => {
            let supervisor = Supervisor::new(config)?;
            match supervisor.storage().verify_backup(&backup) {
                Ok(true) => println!("✅ {} matches its checksum", backup.display()),
                Ok(false) => println!("⚠️  {} has no checksum file", backup.display()),
                Err(e @ StorageError::ChecksumMismatch { .. }) => {
                    println!("❌ {}", e);
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }
            Ok(())
        }
        Commands::Restore { backup, target } => {
            let supervisor = Supervisor::new(config)?;
            match supervisor.restore(&backup, &target) {
                Ok(()) => {
                    println!("✅ Restored {} from {}", target.display(), backup.display());
                    Ok(())
                }
                Err(SupervisorError::Storage(e)) if e.is_checksum_mismatch() => {
                    println!("❌ Refusing to restore: {}", e);
                    println!("   {} was not modified", target.display());
                    std::process::exit(1);
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Prune { path, keep, dir } => {
            if let Some(dir) = dir {
                config.backup_dir = dir;
            }
            if let Some(keep) = keep {
                config.backup_retention = keep;
            }
            let supervisor = Supervisor::new(config)?;
            let removed = supervisor.prune_backups(&path)?;
            println!("Removed {} backup(s) of {}", removed.len(), path.display());
            for backup in removed {
                println!("   {}", backup.display());
            }
            Ok(())
        }
    }
}

/// `RUST_LOG` wins unless `--debug` is given
fn init_logging(debug: bool, json: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: SupervisorConfig) -> Result<()> {
    let supervisor = Supervisor::new(config)?;
    supervisor.register_store_defaults();

    if supervisor.check_names().is_empty() {
        bail!("No stores configured; set stores.primary and/or stores.secondary");
    }

    supervisor.register_callback(|mode| {
        tracing::info!(mode = %mode, "Mode changed");
    });

    supervisor.start()?;
    println!("Supervising {} (Ctrl-C to stop)", supervisor.check_names().join(", "));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    supervisor.stop();
    print_json(&supervisor.status())
}

async fn status(config: SupervisorConfig) -> Result<()> {
    let supervisor = Supervisor::new(config)?;
    supervisor.register_store_defaults();
    supervisor.run_cycle().await;
    print_json(&supervisor.status())
}

fn integrity(config: &SupervisorConfig, path: Option<PathBuf>) -> Result<()> {
    let supervisor = Supervisor::new(config.clone())?;
    let mut failed = false;

    for store in store_paths(config, path)? {
        match supervisor.check_integrity_at(&store) {
            Ok(()) => println!("✅ {}: ok", store.display()),
            Err(SupervisorError::Storage(StorageError::Integrity { issues })) => {
                failed = true;
                println!("❌ {}: {} issue(s)", store.display(), issues.len());
                for issue in issues {
                    println!("   - {}", issue);
                }
            }
            Err(e) => {
                failed = true;
                println!("❌ {}: {}", store.display(), e);
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Explicit path, or every store in the configuration
fn store_paths(config: &SupervisorConfig, path: Option<PathBuf>) -> Result<Vec<PathBuf>> {
    if let Some(path) = path {
        return Ok(vec![path]);
    }

    let stores: Vec<PathBuf> = [&config.stores.primary, &config.stores.secondary]
        .into_iter()
        .flatten()
        .map(|p: &PathBuf| p.to_path_buf())
        .collect();

    if stores.is_empty() {
        bail!("No store path given and none configured");
    }
    Ok(stores)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
