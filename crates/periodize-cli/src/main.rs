mod config;
mod payment_cmd;
mod plan_cmds;
mod serve_cmd;
mod worker_cmd;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use periodize_core::dispatcher::{Dispatcher, PgQueuePublisher};
use periodize_core::payment::{MercadoPagoClient, Reconciler, ReconcilerConfig};
use periodize_core::plan::PlanService;
use periodize_db::pool;

use config::PeriodizeConfig;

#[derive(Parser)]
#[command(name = "periodize", about = "Paid training-plan generation service")]
struct Cli {
    /// Database URL (overrides PERIODIZE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a periodize config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/periodize")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the periodize database (requires config file or env vars)
    DbInit,
    /// Run the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run generation workers until interrupted
    Worker {
        /// Disciplines to consume (repeatable; defaults to all)
        #[arg(long = "discipline")]
        disciplines: Vec<String>,
        /// Maximum concurrent generations (overrides config file)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Show plan counts by status
    Status,
    /// Plan management
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Payment management
    Payment {
        #[command(subcommand)]
        command: PaymentCommands,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Show one plan in full
    Show {
        /// Plan ID to show
        plan_id: String,
    },
    /// List plans, optionally for one owner
    List {
        /// Only plans belonging to this owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Queue a paid or failed plan for generation again
    Requeue {
        /// Plan ID to requeue
        plan_id: String,
    },
    /// Fail plans stuck in generating so they can be requested again
    ResetStale {
        /// Minimum age in minutes of a generating plan to reset
        #[arg(long, default_value_t = 30)]
        older_than_mins: u64,
    },
}

#[derive(Subcommand)]
pub enum PaymentCommands {
    /// Reconcile one payment with the gateway
    Reconcile {
        /// External reference of the payment
        external_reference: String,
    },
    /// List payments recorded for a plan
    List {
        /// Plan ID whose payments to list
        plan_id: String,
    },
}

/// Execute the `periodize init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        storage: config::StorageSection {
            root: Some(config::default_storage_root().display().to_string()),
        },
        ..Default::default()
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  storage.root = {}", config::default_storage_root().display());
    println!();
    println!("Set {} and {} before serving or running workers.",
        config::ENV_GATEWAY_ACCESS_TOKEN,
        config::ENV_RENDERER_API_KEY,
    );
    println!("Next: run `periodize db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `periodize db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = PeriodizeConfig::resolve(cli_db_url)?;

    println!("Initializing periodize database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("periodize db-init complete.");
    Ok(())
}

/// Services shared by the request-layer commands.
fn build_services(resolved: &PeriodizeConfig, db_pool: &sqlx::PgPool) -> (PlanService, Arc<Reconciler>) {
    let dispatcher = Dispatcher::new(Arc::new(PgQueuePublisher::new(db_pool.clone())));
    let plans = PlanService::new(db_pool.clone(), dispatcher);
    let gateway = MercadoPagoClient::new(resolved.gateway.clone());
    let reconciler = Arc::new(Reconciler::new(
        db_pool.clone(),
        Arc::new(gateway),
        ReconcilerConfig::default(),
    ));
    (plans, reconciler)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = PeriodizeConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let (plans, reconciler) = build_services(&resolved, &db_pool);
            let state = serve_cmd::AppState {
                plans,
                reconciler,
                webhook_secret: resolved.webhook_secret.clone(),
            };
            let result = serve_cmd::run_serve(state, &bind, port).await;
            db_pool.close().await;
            result?;
        }
        Commands::Worker {
            disciplines,
            concurrency,
        } => {
            let resolved = PeriodizeConfig::resolve(cli.database_url.as_deref())?;
            // One connection per in-flight generation plus the pollers.
            let generations = concurrency.unwrap_or(resolved.pool.concurrency);
            let connections = u32::try_from(generations).unwrap_or(u32::MAX).saturating_add(2);
            let db_pool = pool::create_pool_sized(&resolved.db_config, connections).await?;
            let result =
                worker_cmd::run_workers(&db_pool, &resolved, &disciplines, concurrency).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status => {
            let resolved = PeriodizeConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = plan_cmds::run_status(&db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Plan { command } => {
            let resolved = PeriodizeConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let (plans, _) = build_services(&resolved, &db_pool);
            let result = plan_cmds::run_plan_command(command, &db_pool, &plans).await;
            db_pool.close().await;
            result?;
        }
        Commands::Payment { command } => {
            let resolved = PeriodizeConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let (_, reconciler) = build_services(&resolved, &db_pool);
            let result = payment_cmd::run_payment_command(command, &reconciler).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
