mod commands;
mod pipeline;
mod schedule;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Age window used when `--max-age-days` is not given.
pub(crate) const DEFAULT_MAX_AGE_DAYS: u32 = 7;

#[derive(Debug, Parser)]
#[command(name = "radar-cli")]
#[command(about = "Harvest community posts and score them against tenant products")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Harvest categories into the item store without scoring
    Harvest {
        /// Category to harvest (repeatable); defaults to every registry category
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Skip posts older than this many days
        #[arg(long, default_value_t = DEFAULT_MAX_AGE_DAYS)]
        max_age_days: u32,
    },
    /// Score pending items for a tenant without harvesting
    Score {
        /// Tenant id from the registry
        #[arg(long)]
        tenant: String,

        /// Restrict enrichment to one product; every product is still scored
        #[arg(long)]
        product: Option<String>,

        /// Restrict selection to these categories (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Per-product cap on selected items
        #[arg(long)]
        limit: Option<usize>,

        /// Rescore every item regardless of change state
        #[arg(long, conflicts_with = "global")]
        force: bool,

        /// Select by each item's own processed snapshot (maintenance)
        #[arg(long)]
        global: bool,
    },
    /// Harvest and score in one tracked pipeline run
    Run {
        /// Tenant id from the registry
        #[arg(long)]
        tenant: String,

        /// Restrict enrichment to one product; every product is still scored
        #[arg(long)]
        product: Option<String>,

        /// Category to harvest (repeatable); defaults to the tenant's targets
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Skip posts older than this many days
        #[arg(long, default_value_t = DEFAULT_MAX_AGE_DAYS)]
        max_age_days: u32,

        /// Show the planned run without fetching or writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show one pipeline run, or the most recent runs
    Status {
        /// Run id; omit to list recent runs
        run_id: Option<Uuid>,

        /// Filter the listing to one tenant
        #[arg(long)]
        tenant: Option<String>,

        /// Number of runs to list
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Mark running runs without a recent status update as timed out
    ReapStalled {
        /// Minutes without an update before a run counts as stalled
        #[arg(long)]
        timeout_mins: Option<u64>,
    },
    /// Run the pipeline for every tenant on a cron schedule until interrupted
    Schedule {
        /// Six-field cron expression; defaults to `RADAR_SCHEDULE_CRON`
        #[arg(long)]
        cron: Option<String>,
    },
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = radar_core::load_app_config()?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("radar-cli: no command given; run with --help for usage");
        return Ok(());
    };

    match command {
        Commands::Harvest {
            categories,
            max_age_days,
        } => commands::run_harvest(&config, &categories, max_age_days).await,
        Commands::Score {
            tenant,
            product,
            categories,
            limit,
            force,
            global,
        } => {
            let mode = commands::score_mode(force, global);
            commands::run_score(&config, &tenant, product, &categories, limit, mode).await
        }
        Commands::Run {
            tenant,
            product,
            categories,
            max_age_days,
            dry_run,
        } => {
            commands::run_once(&config, &tenant, product, &categories, max_age_days, dry_run)
                .await
        }
        Commands::Status {
            run_id,
            tenant,
            limit,
        } => commands::run_status(&config, run_id, tenant.as_deref(), limit).await,
        Commands::ReapStalled { timeout_mins } => {
            commands::run_reap(&config, timeout_mins.unwrap_or(config.run_stall_timeout_mins))
                .await
        }
        Commands::Schedule { cron } => {
            let cron = cron.unwrap_or_else(|| config.schedule_cron.clone());
            schedule::run_schedule(config, &cron).await
        }
        Commands::Db { command } => match command {
            DbCommands::Ping => commands::run_db_ping(&config).await,
            DbCommands::Migrate => commands::run_db_migrate(&config).await,
        },
    }
}
