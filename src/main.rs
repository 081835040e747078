use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use ledgerlink::catalog::InstitutionCatalog;
use ledgerlink::config::Config;
use ledgerlink::linking::LinkingService;
use ledgerlink::models::Id;
use ledgerlink::networth::{NetWorthService, NetWorthStatus};
use ledgerlink::provider::{BankProvider, ProviderClient};
use ledgerlink::storage::{JsonFileStorage, Storage};
use ledgerlink::sync::{
    InstitutionSyncMessage, Job, JobQueue, MemoryJobQueue, SyncHandlers, Worker,
};
use ledgerlink::users::UserService;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ledgerlink")]
#[command(about = "Open-banking account linking and sync")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "ledgerlink.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show current configuration
    Config,
    /// List institutions available for linking
    Institutions {
        /// Two-letter country code; defaults to the configured country
        #[arg(long)]
        country: Option<String>,
    },
    /// Start (or resume) linking an institution
    Link {
        /// Identity-provider subject of the user
        #[arg(long)]
        user: String,
        /// Institution id from the `institutions` listing
        #[arg(long)]
        institution: String,
    },
    /// Sync linked accounts and recompute running balances
    Sync {
        #[arg(long)]
        user: String,
        /// Only sync one institution instead of all linked ones
        #[arg(long)]
        institution: Option<String>,
    },
    /// Print net worth history
    Networth {
        #[arg(long)]
        user: String,
    },
    /// Mark a user's onboarding as complete
    Onboard {
        #[arg(long)]
        user: String,
    },
}

struct App {
    config: Config,
    data_dir: PathBuf,
    storage: Arc<dyn Storage>,
    provider: Arc<dyn BankProvider>,
}

impl App {
    fn new(config: Config, config_path: &std::path::Path) -> Self {
        let config_dir = config_path.parent().unwrap_or(std::path::Path::new("."));
        let data_dir = config.resolve_data_dir(config_dir);
        let storage: Arc<dyn Storage> = Arc::new(JsonFileStorage::new(&data_dir));
        let provider: Arc<dyn BankProvider> = Arc::new(ProviderClient::new(&config.provider));
        Self {
            config,
            data_dir,
            storage,
            provider,
        }
    }

    fn users(&self) -> UserService {
        UserService::new(Arc::clone(&self.storage))
    }

    async fn user_id(&self, subject: &str) -> Result<uuid::Uuid> {
        Ok(self.users().ensure_user(subject, None).await?.id)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Command::Config => {
            let app = App::new(config, &cli.config);
            println!("Config file: {}", cli.config.display());
            println!("Data directory: {}", app.data_dir.display());
            println!("Provider: {}", app.config.provider.base_url);
            println!("Country: {}", app.config.country);
        }
        Command::Institutions { country } => {
            let app = App::new(config, &cli.config);
            let country = country.unwrap_or_else(|| app.config.country.clone());
            let catalog = InstitutionCatalog::new(
                Arc::clone(&app.storage),
                Arc::clone(&app.provider),
                chrono::Duration::hours(app.config.catalog.ttl_hours),
            );
            for institution in catalog.list(&country).await? {
                println!("{}  {}", institution.id, institution.name);
            }
        }
        Command::Link { user, institution } => {
            let app = App::new(config, &cli.config);
            let user_id = app.user_id(&user).await?;
            let linking = LinkingService::new(
                Arc::clone(&app.storage),
                Arc::clone(&app.provider),
                app.config.provider.redirect_url.clone(),
            );
            let outcome = linking
                .link_institution(user_id, &Id::from_string_checked(institution)?)
                .await?;

            if outcome.is_already_linked {
                println!("Link already in progress or complete ({:?})", outcome.status);
            } else {
                println!("Link started ({:?})", outcome.status);
            }
            println!("Requisition: {}", outcome.requisition_id);
            if let Some(link) = outcome.authorization_link {
                println!("Authorize at: {link}");
            }
        }
        Command::Sync { user, institution } => {
            let app = App::new(config, &cli.config);
            let user_id = app.user_id(&user).await?;

            let institutions: Vec<Id> = match institution {
                Some(id) => vec![Id::from_string_checked(id)?],
                None => {
                    let mut ids: Vec<Id> = app
                        .storage
                        .accounts_for_user(user_id)
                        .await?
                        .into_iter()
                        .map(|a| a.institution_id)
                        .collect();
                    ids.sort();
                    ids.dedup();
                    ids
                }
            };
            if institutions.is_empty() {
                bail!("no linked institutions to sync; run `ledgerlink link` first");
            }

            let queue = Arc::new(MemoryJobQueue::new());
            let job_queue: Arc<dyn JobQueue> = Arc::clone(&queue) as Arc<dyn JobQueue>;
            let handlers = Arc::new(SyncHandlers::new(
                Arc::clone(&app.storage),
                Arc::clone(&app.provider),
                job_queue,
                app.config.sync.lookback_days,
            ));

            for institution_id in institutions {
                queue
                    .enqueue(Job::InstitutionSync(InstitutionSyncMessage {
                        institution_id,
                        user_id,
                    }))
                    .await?;
            }

            let worker = Worker::new(queue, handlers, app.config.sync.max_deliveries);
            let attempted = worker.run_until_idle().await?;
            println!("Processed {attempted} sync jobs");
        }
        Command::Networth { user } => {
            let app = App::new(config, &cli.config);
            let user_id = app.user_id(&user).await?;
            let history = NetWorthService::new(Arc::clone(&app.storage))
                .history(user_id)
                .await?;

            match history.status {
                NetWorthStatus::NotCalculated => {
                    println!("Net worth not calculated yet; run `ledgerlink sync` first.");
                }
                NetWorthStatus::Calculated => {
                    for point in &history.points {
                        println!("{}  {}", point.date, point.amount);
                    }
                }
            }
        }
        Command::Onboard { user } => {
            let app = App::new(config, &cli.config);
            let user_id = app.user_id(&user).await?;
            let user = app.users().complete_onboarding(user_id).await?;
            println!("User {} onboarded", user.id);
        }
    }

    Ok(())
}
