use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use tokio::sync::watch;

use playlog_sync::persistence;
use playlog_sync::report;
use playlog_sync::sync::runtime::{EXIT_CONFIG, EXIT_OK};
use playlog_sync::{
    open_engine, ConfigOverrides, HistoryStore, PortalSource, Scheduler, SessionToken, StoredRecord,
    SyncConfig, SyncError, TokenStore,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON settings file, applied over the built-in defaults.
    #[arg(long, global = true, env = "PLAYLOG_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "PLAYLOG_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "PLAYLOG_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    #[arg(long, global = true, env = "PLAYLOG_HISTORY_FILE")]
    history_file: Option<PathBuf>,

    /// Hard ceiling on a single fetch.
    #[arg(long, global = true, env = "PLAYLOG_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[arg(long, global = true, env = "PLAYLOG_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync cycle and exit (0 ok, 75 retry later, 78 operator action needed).
    Run,
    /// Sync on a fixed interval until Ctrl-C or a fatal failure.
    Daemon {
        #[arg(long, env = "PLAYLOG_INTERVAL_SECS")]
        interval_secs: Option<u64>,
    },
    /// Store a fresh credential, clearing a halted state.
    SetToken {
        /// Bootstrap file as written by the capture app.
        #[arg(long, conflicts_with_all = ["subject_id", "credential"], required_unless_present = "credential")]
        file: Option<PathBuf>,
        #[arg(long, requires = "credential")]
        subject_id: Option<String>,
        #[arg(long, requires = "subject_id")]
        credential: Option<String>,
    },
    /// Show token and history state.
    Status,
    /// Read-only views over the stored history.
    Query {
        #[command(subcommand)]
        view: QueryView,
    },
    /// Write every stored record to a JSON file.
    Export {
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum QueryView {
    Overview,
    Recent {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    Best {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    Search {
        title: String,
    },
    Difficulty,
    Combos,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            log::error!("[MAIN] {err}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let code = match cli.command {
        Command::Run => run_once(&config).await?,
        Command::Daemon { .. } => run_daemon(&config).await?,
        Command::SetToken {
            file,
            subject_id,
            credential,
        } => set_token(&config, file, subject_id, credential)?,
        Command::Status => status(&config)?,
        Command::Query { view } => query(&config, view)?,
        Command::Export { out } => {
            let store = HistoryStore::open(config.history_path())?;
            let count = report::export_json(&store, &out, chrono::Utc::now())?;
            println!("Exported {} records to {}", count, out.display());
            EXIT_OK
        }
    };

    if code != EXIT_OK {
        std::process::exit(code);
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<SyncConfig, SyncError> {
    let mut config = SyncConfig::load(cli.config.as_deref())?;

    let interval_secs = match &cli.command {
        Command::Daemon { interval_secs } => *interval_secs,
        _ => None,
    };
    config.apply(ConfigOverrides {
        data_dir: cli.data_dir.clone(),
        token_file: cli.token_file.clone(),
        history_file: cli.history_file.clone(),
        interval_secs,
        fetch_timeout_secs: cli.timeout_secs,
        portal_base_url: cli.base_url.clone(),
    });

    config.validate()?;
    Ok(config)
}

fn scheduler(config: &SyncConfig) -> Result<Scheduler<PortalSource>> {
    let source = PortalSource::new(&config.portal())?;
    let engine = open_engine(config, source)?;
    Ok(Scheduler::new(engine, &config.scheduler()))
}

async fn run_once(config: &SyncConfig) -> Result<i32> {
    let mut scheduler = scheduler(config)?;
    let (status, outcome) = scheduler.run_once().await;

    match &outcome.error {
        None => println!(
            "Sync ok: {} new, {} already stored, {} dropped{}",
            outcome.added,
            outcome.seen,
            outcome.dropped,
            if outcome.token_rotated { ", credential rotated" } else { "" }
        ),
        Some(err) => eprintln!("Sync failed: {err}"),
    }
    Ok(status.exit_code())
}

async fn run_daemon(config: &SyncConfig) -> Result<i32> {
    let mut scheduler = scheduler(config)?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("[MAIN] Ctrl-C received, shutting down");
            let _ = stop_tx.send(true);
        }
    });

    let exit = scheduler.run_daemon(stop_rx).await;
    if let playlog_sync::SchedulerExit::Halted(outcome) = &exit {
        eprintln!("Daemon halted: {outcome}");
        eprintln!("Supply a fresh credential with `set-token` and restart.");
    }
    Ok(exit.exit_code())
}

fn set_token(
    config: &SyncConfig,
    file: Option<PathBuf>,
    subject_id: Option<String>,
    credential: Option<String>,
) -> Result<i32> {
    let token = match (file, subject_id, credential) {
        (Some(file), _, _) => persistence::load_json::<SessionToken>(&file)?
            .with_context(|| format!("token file {} not found", file.display()))?,
        (None, Some(subject_id), Some(credential)) => {
            SessionToken::new(subject_id, credential, chrono::Utc::now())
        }
        _ => anyhow::bail!("either --file or both --subject-id and --credential are required"),
    };

    let mut tokens = TokenStore::open(config.token_path())?;
    let redacted = token.redacted_credential();
    if tokens.replace(token)? {
        println!("Stored credential {} in {}", redacted, tokens.path().display());
    } else {
        println!("Credential {} is already stored; nothing changed", redacted);
    }
    Ok(EXIT_OK)
}

fn status(config: &SyncConfig) -> Result<i32> {
    let tokens = TokenStore::open(config.token_path())?;
    let history = HistoryStore::open(config.history_path())?;

    println!("-----------------------------------");
    match tokens.current() {
        Ok(token) => {
            println!("Subject:          {}", token.subject_id);
            println!("Credential:       {}", token.redacted_credential());
            println!("Issued at:        {}", token.issued_at);
            match token.invalidated_at {
                Some(at) => println!("State:            HALTED (rejected at {at})"),
                None => println!("State:            active"),
            }
        }
        Err(_) => println!("Token:            not initialized"),
    }
    println!("Stored records:   {}", history.count());
    println!("Cycles:           {}", history.cycle_count());
    println!(
        "Last sync:        {}",
        history
            .last_sync_at()
            .map_or_else(|| "never".to_string(), |t| t.to_string())
    );
    println!("-----------------------------------");
    Ok(EXIT_OK)
}

fn query(config: &SyncConfig, view: QueryView) -> Result<i32> {
    let store = HistoryStore::open(config.history_path())?;

    match view {
        QueryView::Overview => {
            let o = report::overview(&store);
            println!("Records:          {}", o.total_records);
            println!("Distinct charts:  {}", o.distinct_charts);
            println!("Average:          {}", opt(o.average_achievement));
            println!("Best:             {}", opt(o.best_achievement));
            println!("Cycles:           {}", o.cycle_count);
            println!("Last sync:        {}", opt(o.last_sync_at));
        }
        QueryView::Recent { limit } => print_records(&report::recent(&store, limit)),
        QueryView::Best { limit } => print_records(&report::best(&store, limit)),
        QueryView::Search { title } => print_records(&report::search(&store, &title)),
        QueryView::Difficulty => {
            for (tier, count) in report::difficulty_distribution(&store) {
                println!("{:<10} | {:>6}", tier.to_string(), count);
            }
        }
        QueryView::Combos => {
            let lamps = report::lamp_distribution(&store);
            for (label, count) in &lamps.full_combo {
                println!("combo {:<5} | {:>6}", label, count);
            }
            for (label, count) in &lamps.full_sync {
                println!("sync  {:<5} | {:>6}", label, count);
            }
        }
    }
    Ok(EXIT_OK)
}

fn print_records(records: &[&StoredRecord]) {
    println!(
        "{:<32} | {:<10} | {:>9} | {:<4} | {}",
        "Title", "Difficulty", "Achieve", "Rank", "First seen"
    );
    println!("{}", "-".repeat(90));
    for stored in records {
        let r = &stored.record;
        println!(
            "{:<32} | {:<10} | {:>9} | {:<4} | {}",
            r.title,
            r.difficulty.to_string(),
            r.achievement.to_string(),
            r.rank.to_string(),
            stored.first_seen_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("{} record(s)", records.len());
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
