// hypebank - Operator CLI for the HypeCoin bank and bookie
//
// One-shot commands inspect and move coins. `serve` runs the minting and
// payment-queue schedulers until Ctrl-C.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use hypecoin::bookie::{Bookie, BookieError, Inventory};
use hypecoin::config::{AppConfig, ConfigError, LoggingConfig, SchedulerConfig};
use hypecoin::ledger::{format_coins, Bank, BankError, ParsedAmount, PaymentRequest};
use hypecoin::storage::{open_store, DurableQueue, OptimisticStore, StoreError};

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bank(#[from] BankError),

    #[error(transparent)]
    Bookie(#[from] BookieError),

    #[error("Runtime failure: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("{0}")]
    Usage(String),
}

#[derive(Parser, Debug)]
#[command(name = "hypebank", version, about = "Operate the HypeCoin bank and bookie")]
struct Cli {
    /// TOML file with configuration overrides
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage engine, overriding the config file
    #[arg(long)]
    engine: Option<String>,

    /// Database path, overriding the config file
    #[arg(long)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show an account's balance
    Balance { user: String },

    /// Pay one or more merchants
    Pay {
        customer: String,
        #[arg(required = true)]
        merchants: Vec<String>,
        /// Amount as typed in chat: "500", "2.5k", "0xff", "all"
        #[arg(short, long)]
        amount: String,
        #[arg(short, long, default_value = "Operator payment")]
        details: String,
        #[arg(long)]
        overdraft: bool,
        /// Comma separated split weights, one per merchant
        #[arg(long, value_delimiter = ',')]
        weights: Option<Vec<f64>>,
        /// Queue the payment for the scheduler instead of paying now
        #[arg(long)]
        defer: bool,
    },

    /// Show an account's recent ledger entries
    History { user: String },

    /// Show accounts and coins in circulation
    Stats {
        /// Leave out the bot's own accounts
        #[arg(long)]
        plebs: bool,
        /// Only sub-accounts of this account
        #[arg(long)]
        account: Option<String>,
    },

    /// Mint new coins if the mint is below its reserve
    Mint,

    /// List outstanding bets on a game
    Bets {
        game: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        resolver: Option<String>,
    },

    /// Run the mint and payment queue schedulers until Ctrl-C
    Serve,
}

/// Item payouts need a chat inventory, which the operator CLI does not have
struct UnavailableInventory;

impl Inventory for UnavailableInventory {
    fn add_item(&self, user: &str, item: &Value) -> bool {
        warn!(user, %item, "No inventory attached, item not awarded");
        false
    }
}

fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.filter));

    if cfg.json {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(engine) = &cli.engine {
        config.storage.engine = engine.clone();
    }
    if let Some(path) = &cli.path {
        config.storage.path = path.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "hypebank failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    init_logging(&config.logging);

    let store = Arc::new(open_store(&config.storage)?);
    let bank = Arc::new(Bank::new(store.clone(), config.bank.clone()));
    let queue = Arc::new(DurableQueue::new(store, &config.scheduler.payment_queue));

    match cli.command {
        Command::Balance { user } => {
            println!("{}: {}", user, format_coins(bank.get_balance(&user)?, false));
        }
        Command::Pay {
            customer,
            merchants,
            amount,
            details,
            overdraft,
            weights,
            defer,
        } => {
            let amount = match bank.parse_amount(&customer, &amount)? {
                ParsedAmount::Amount(amount) => amount,
                ParsedAmount::Rejected(reason) => return Err(CliError::Usage(reason.to_string())),
            };
            let merchants: Vec<&str> = merchants.iter().map(String::as_str).collect();
            let request = PaymentRequest::new(&customer, &merchants, amount)
                .with_details(&details)
                .with_overdraft(overdraft)
                .with_weights(weights);
            if defer {
                let payload = serde_json::to_value(&request)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                queue.enqueue(payload, None)?;
                println!("Queued {} from {}", format_coins(request.amount, false), request.customer);
            } else if bank.process_request(&request)? {
                println!("Paid {} from {}", format_coins(request.amount, false), request.customer);
            } else {
                return Err(CliError::Usage(format!("Payment from {} failed", request.customer)));
            }
        }
        Command::History { user } => {
            for entry in bank.get_transactions(&user)? {
                println!(
                    "{}  {:>12}  {:<16}  {}",
                    entry.create_time.format("%Y-%m-%d %H:%M:%S"),
                    format_coins(entry.amount, false),
                    entry.counterparty,
                    entry.details
                );
            }
        }
        Command::Stats { plebs, account } => {
            let (users, circulation) = bank.get_bank_stats(plebs, account.as_deref())?;
            println!("{} accounts hold {}", users, format_coins(circulation, true));
        }
        Command::Mint => match bank.mint_new_coins()? {
            Some(amount) => println!("Minted {}", format_coins(amount, false)),
            None => println!("Mint holds its reserve, nothing minted"),
        },
        Command::Bets { game, user, resolver } => {
            let bookie = Bookie::new(bank.clone(), Arc::new(UnavailableInventory));
            let bets = bookie.lookup_bets(&game, user.as_deref(), resolver.as_deref())?;
            for (user, user_bets) in bets {
                for bet in user_bets {
                    println!(
                        "{}  {:?}  {}  {}",
                        user,
                        bet.direction,
                        bet.target,
                        format_coins(bet.amount, false)
                    );
                }
            }
        }
        Command::Serve => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(serve(bank, queue, config.scheduler))?;
        }
    }
    Ok(())
}

async fn serve(
    bank: Arc<Bank<OptimisticStore>>,
    queue: Arc<DurableQueue<OptimisticStore>>,
    cfg: SchedulerConfig,
) -> Result<(), CliError> {
    let mut mint_interval = tokio::time::interval(Duration::from_secs(cfg.mint_interval_secs));
    let mut queue_interval = tokio::time::interval(Duration::from_secs(cfg.queue_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        mint_interval_secs = cfg.mint_interval_secs,
        queue_interval_secs = cfg.queue_interval_secs,
        queue = %queue.key(),
        "Schedulers running. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = mint_interval.tick() => {
                let bank = bank.clone();
                match tokio::task::spawn_blocking(move || bank.mint_new_coins()).await {
                    Ok(Ok(Some(amount))) => info!(amount, "Scheduled mint"),
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => error!(error = %e, "Scheduled mint failed"),
                    Err(e) => error!(error = %e, "Mint task panicked"),
                }
            }
            _ = queue_interval.tick() => {
                let (bank, queue) = (bank.clone(), queue.clone());
                let batch_size = cfg.queue_batch_size;
                let drained = tokio::task::spawn_blocking(move || {
                    queue.process(batch_size, |payload, tx| bank.settle_queued(payload, tx))
                })
                .await;
                match drained {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(error = %e, "Payment queue processing failed"),
                    Err(e) => error!(error = %e, "Queue task panicked"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }
    Ok(())
}
