use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use moodsync::{
    ConflictStrategy, ProgressChannel, SettingsUpdate, SyncEngine, SyncOptions,
};
use moodsync_core::{DirRemoteStore, FileKv, MemoryStore, StaticAuth, StaticDevice};

mod library;

#[derive(Parser)]
#[command(name = "moodsync")]
#[command(about = "Sync a moodboard library through a shared folder")]
struct Cli {
    /// Path to the library JSON file
    #[arg(long, global = true, default_value = "library.json")]
    library: PathBuf,

    /// Shared folder acting as the remote store
    #[arg(long, global = true, default_value = "remote")]
    remote: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync now
    Sync {
        /// Bypass the minimum interval between syncs
        #[arg(long)]
        force: bool,
        /// Conflict strategy: newest-wins, local-wins, remote-wins, or ask
        #[arg(long)]
        strategy: Option<ConflictStrategy>,
    },
    /// Show what a sync would do without transferring anything
    Check,
    /// Show sync settings and the last sync time
    Status,
}

struct App {
    engine: SyncEngine,
    store: Arc<MemoryStore>,
    library_path: PathBuf,
}

async fn open(cli: &Cli) -> Result<App> {
    let store = Arc::new(library::load_store(&cli.library).await?);
    let state_path = cli.library.with_extension("syncstate.json");
    debug!(
        library = %cli.library.display(),
        remote = %cli.remote.display(),
        state = %state_path.display(),
        "opening library"
    );

    let engine = SyncEngine::new(
        store.clone(),
        Arc::new(DirRemoteStore::new(&cli.remote)),
        Arc::new(StaticAuth::default()),
        // only used the first time; afterwards the stored settings keep the
        // device id minted on that first run
        Arc::new(StaticDevice::new(
            Uuid::new_v4().to_string(),
            "moodsync-cli",
        )),
        Arc::new(FileKv::new(state_path)),
    );
    engine.connect("folder").await?;

    Ok(App {
        engine,
        store,
        library_path: cli.library.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let app = open(&cli).await?;

    match cli.command {
        Commands::Sync { force, strategy } => {
            if let Some(strategy) = strategy {
                app.engine
                    .save_sync_settings(SettingsUpdate {
                        conflict_strategy: Some(strategy),
                        ..Default::default()
                    })
                    .await?;
            }

            let (reporter, mut channel) = ProgressChannel::new();
            let printer = tokio::spawn(async move {
                let mut last_phase = None;
                while let Some(update) = channel.recv().await {
                    if last_phase != Some(update.phase) {
                        eprintln!("{}...", update.phase);
                        last_phase = Some(update.phase);
                    }
                }
            });

            let result = app
                .engine
                .perform_sync(SyncOptions {
                    force,
                    progress: Some(reporter),
                    ..Default::default()
                })
                .await;
            let _ = printer.await;

            for issue in &result.errors {
                match (&issue.entity_kind, &issue.entity_id) {
                    (Some(kind), Some(id)) => eprintln!("error [{kind} {id}]: {}", issue.message),
                    _ => eprintln!("error: {}", issue.message),
                }
            }
            if !result.success {
                eprintln!("sync failed");
                std::process::exit(1);
            }

            library::save_store(&app.library_path, &app.store).await?;
            for (kind, counts) in &result.breakdown {
                println!(
                    "{kind}: {} added, {} updated, {} deleted",
                    counts.added, counts.updated, counts.deleted
                );
            }
            println!("{}", result.summary());
        }
        Commands::Check => {
            let check = app.engine.check_for_changes().await?;
            if check.has_changes {
                match check.direction {
                    Some(direction) => println!("changes pending ({direction:?})"),
                    None => println!("changes pending"),
                }
            } else {
                println!("up to date");
            }
        }
        Commands::Status => {
            let settings = app.engine.sync_settings().await?;
            println!("device:    {} ({})", settings.device_name, settings.device_id);
            println!("enabled:   {}", settings.enabled);
            println!(
                "provider:  {}",
                settings.provider.as_deref().unwrap_or("none")
            );
            println!("strategy:  {:?}", settings.conflict_strategy);
            println!(
                "auto sync: {} (every {} min)",
                settings.auto_sync, settings.sync_interval_minutes
            );
            match app.engine.last_sync_at().await? {
                Some(at) => println!("last sync: {}", at.to_rfc3339()),
                None => println!("last sync: never"),
            }
        }
    }

    Ok(())
}
