use anyhow::Result;
use clap::Parser;
use tracing::info;

use stockade_core::bus::NoopPublisher;
use stockade_core::db::migrate::Migrator;
use stockade_core::{Config, Database, ExpirySweeper, ReservationStore, StockLedger};

#[derive(Parser)]
#[command(
    name = "stockade",
    about = "Stockade - flash-sale reservation engine",
    version
)]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the HTTP server
    Server {
        #[arg(long, help = "Bind address override")]
        host: Option<String>,

        #[arg(short, long, help = "Bind port override")]
        port: Option<u16>,
    },

    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        command: MigrateCommand,
    },

    /// Run one expiry pass and exit
    Sweep,

    /// Report items whose stored stock counts drifted
    CheckConsistency {
        #[arg(long, help = "Repair drifted rows")]
        fix: bool,
    },

    /// Show or validate configuration
    Config {
        #[arg(long, help = "Validate configuration and exit")]
        validate: bool,
    },
}

#[derive(clap::Subcommand)]
enum MigrateCommand {
    /// Run pending migrations
    Run,

    /// List applied migrations
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    init_logging(&config, cli.verbose);

    match cli.command.unwrap_or(Commands::Server {
        host: None,
        port: None,
    }) {
        Commands::Server { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            stockade_api::run(config).await?;
        }

        Commands::Migrate { command } => {
            let pool = stockade_core::create_pool(&config.database).await?;
            let migrator = Migrator::new(pool);

            match command {
                MigrateCommand::Run => {
                    migrator.migrate().await?;
                    info!("Migrations complete");
                }
                MigrateCommand::Status => {
                    for migration in migrator.applied().await? {
                        println!(
                            "{:>4}  {}  {}",
                            migration.version, migration.applied_at, migration.name
                        );
                    }
                }
            }
        }

        Commands::Sweep => {
            let (db, ledger, store) = collaborators(&config).await?;
            let sweeper = ExpirySweeper::new(
                db,
                ledger,
                store,
                std::sync::Arc::new(NoopPublisher),
                config.reservations.clone(),
            );

            let outcome = sweeper.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::CheckConsistency { fix } => {
            let (_, ledger, _) = collaborators(&config).await?;

            let violations = ledger.check_consistency().await?;
            if violations.is_empty() {
                println!("All items consistent");
            } else {
                println!("{}", serde_json::to_string_pretty(&violations)?);
                if fix {
                    let fixed = ledger.fix_consistency().await?;
                    println!("Repaired {} rows", fixed);
                }
            }
        }

        Commands::Config { validate } => {
            if validate {
                config.validate()?;
                println!("Configuration valid");
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

async fn collaborators(config: &Config) -> Result<(Database, StockLedger, ReservationStore)> {
    let pool = stockade_core::create_pool(&config.database).await?;
    let db = Database::new(pool);
    Ok((
        db.clone(),
        StockLedger::new(db.clone()),
        ReservationStore::new(db),
    ))
}

fn init_logging(config: &Config, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stockade={0},stockade_core={0},stockade_api={0}", default_level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
