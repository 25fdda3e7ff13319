//! catalog-sync CLI
//!
//! Local execution entry point for the catalog synchronizer.

use std::path::PathBuf;

use catalog_sync::{
    SyncEngine,
    error::{AppError, Result},
    models::{Config, IdRange},
    pipeline::{PipelineOptions, PipelineReport, SyncRequest},
};
#[cfg(feature = "postgres")]
use catalog_sync::storage::PgConnection;
use clap::{Args, Parser, Subcommand};

/// catalog-sync - Two-source catalog synchronizer
#[derive(Parser, Debug)]
#[command(
    name = "catalog-sync",
    version,
    about = "Mirrors a two-source content catalog into a local index"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the crawl span and listing depth.
#[derive(Args, Debug)]
struct SyncArgs {
    /// Explicit id span instead of the lookup window past the checkpoint
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    range: Option<Vec<u64>>,

    /// Ids probed on each side of the checkpoint
    #[arg(long)]
    lookup_window: Option<u64>,

    /// Maximum listing pages to scan
    #[arg(long)]
    page_limit: Option<usize>,
}

impl SyncArgs {
    fn request(self, config: &Config) -> Result<SyncRequest> {
        let range = parse_range(self.range)?;
        Ok(SyncRequest::with_overrides(
            config,
            range,
            self.lookup_window,
            self.page_limit,
        ))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl both sources and reconcile into the local index
    Sync {
        #[command(flatten)]
        sync: SyncArgs,
    },

    /// Rebuild the inverse hash index from the local index
    RebuildIndex,

    /// Fit the publish time estimator and fill missing timestamps
    FitEstimator,

    /// Write the unfiltered and per-locale snapshots
    Export {
        /// Include records only seen in the listing
        #[arg(long)]
        include_secondary: bool,
    },

    /// Create the remote tables and load the whole index
    InitServer,

    /// Run full pipeline: Sync → Estimate → Export (→ Load)
    Run {
        #[command(flatten)]
        sync: SyncArgs,

        /// Stop after reconciling; nothing is exported or uploaded
        #[arg(long, conflicts_with = "use_server")]
        sync_only: bool,

        /// Also upsert into the remote store
        #[arg(long)]
        use_server: bool,

        /// Include records only seen in the listing
        #[arg(long)]
        include_secondary: bool,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[cfg(feature = "postgres")]
async fn connect(config: &Config) -> Result<PgConnection> {
    let url = config
        .remote
        .connection
        .as_deref()
        .ok_or_else(|| AppError::config("remote.connection is not set"))?;
    let conn = PgConnection::connect(url).await?;
    conn.ensure_schema(&config.remote.summary_table, &config.remote.records_table)
        .await?;
    Ok(conn)
}

fn parse_range(range: Option<Vec<u64>>) -> Result<Option<IdRange>> {
    match range.as_deref() {
        None => Ok(None),
        Some([start, end]) if start <= end => Ok(Some(IdRange::new(*start, *end))),
        Some(values) => Err(AppError::validation(format!(
            "--range expects START <= END, got {values:?}"
        ))),
    }
}

fn finish_run(report: &PipelineReport) -> Result<()> {
    match report.failed_stage {
        Some(stage) => Err(AppError::crawl(
            stage.to_string(),
            format!("run stopped, checkpoint {}", report.checkpoint()),
        )),
        None => Ok(()),
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("catalog-sync starting...");

    let config = Config::load_or_default(&cli.config);
    log::info!("Loaded configuration from {}", cli.config.display());

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        if let Err(e) = config.validate() {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
        log::info!("✓ Config OK (data dir: {})", config.paths.data_dir.display());
        return Ok(());
    }

    let engine = SyncEngine::new(config)?;

    match cli.command {
        Command::Sync { sync } => {
            let range = parse_range(sync.range)?;
            let report = engine
                .sync_from_sources(range, sync.lookup_window, sync.page_limit)
                .await?;
            log::info!(
                "Sync complete: {} records changed, {} conflicts, checkpoint {}",
                report.updated.len(),
                report.conflicts().len(),
                report.checkpoint()
            );
            if let Some(stage) = report.failed_stage() {
                return Err(AppError::crawl(
                    stage.to_string(),
                    format!("stopped early, checkpoint {}", report.checkpoint()),
                ));
            }
        }

        Command::RebuildIndex => {
            let outcome = engine.rebuild_inverse_index().await?;
            log::info!(
                "Inverse index: {} keys, {} conflicts",
                outcome.snapshot.len(),
                outcome.conflicts.len()
            );
        }

        Command::FitEstimator => {
            let params = engine.fit_timestamp_estimator().await?;
            log::info!(
                "Estimator saved: degree {}, ids from {}",
                params.degree,
                params.x_min
            );
        }

        Command::Export { include_secondary } => {
            let include = include_secondary || engine.config().export.include_secondary_only;
            for export in engine.export_partitions(include).await? {
                log::info!(
                    "{}: {} records -> {}",
                    export.locale.as_deref().unwrap_or("all"),
                    export.records,
                    export.location
                );
            }
        }

        #[cfg(feature = "postgres")]
        Command::InitServer => {
            let mut conn = connect(engine.config()).await?;
            for report in engine.init_server(&mut conn).await? {
                if !report.is_complete() {
                    return Err(AppError::remote(format!(
                        "load into {} aborted after {} records",
                        report.table, report.records_committed
                    )));
                }
            }
        }

        #[cfg(not(feature = "postgres"))]
        Command::InitServer => {
            return Err(AppError::config("built without the postgres feature"));
        }

        Command::Run {
            sync,
            sync_only,
            use_server,
            include_secondary,
        } => {
            let options = PipelineOptions {
                sync: sync.request(engine.config())?,
                sync_only,
                include_secondary_only: include_secondary
                    || engine.config().export.include_secondary_only,
            };

            let report = if use_server {
                #[cfg(feature = "postgres")]
                {
                    let mut conn = connect(engine.config()).await?;
                    engine.run_pipeline(options, Some(&mut conn)).await?
                }
                #[cfg(not(feature = "postgres"))]
                {
                    return Err(AppError::config("built without the postgres feature"));
                }
            } else {
                engine.run_pipeline(options, None).await?
            };
            finish_run(&report)?;
        }

        Command::Validate => {}
    }

    log::info!("Done!");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_rejects_sync_only_with_upload() {
        let parsed = Cli::try_parse_from(["catalog-sync", "run", "--sync-only", "--use-server"]);
        assert_eq!(
            parsed.unwrap_err().kind(),
            clap::error::ErrorKind::ArgumentConflict
        );
    }

    #[test]
    fn test_run_accepts_crawl_overrides() {
        let cli = Cli::try_parse_from([
            "catalog-sync",
            "run",
            "--range",
            "10",
            "20",
            "--lookup-window",
            "5",
            "--page-limit",
            "2",
        ])
        .unwrap();
        let Command::Run { sync, sync_only, .. } = cli.command else {
            panic!("expected run");
        };
        assert!(!sync_only);

        let request = sync.request(&Config::default()).unwrap();
        assert_eq!(request.range, Some(IdRange::new(10, 20)));
        assert_eq!(request.lookup_window, 5);
        assert_eq!(request.page_limit, 2);
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        let cli = Cli::try_parse_from(["catalog-sync", "sync", "--range", "20", "10"]).unwrap();
        let Command::Sync { sync } = cli.command else {
            panic!("expected sync");
        };
        assert!(sync.request(&Config::default()).is_err());
    }
}
