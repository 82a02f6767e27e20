mod cli;
mod sim;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Command, RunArgs};
use rand::rngs::StdRng;
use rand::SeedableRng;
use synth_maker::{config_key, MakerConfig, MakerServices, Registry};
use tokio::sync::broadcast::error::RecvError;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use venue::{ConfStore, FileConfStore, VenueError};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv(); // load .env if present

    let cli = cli::Cli::parse();

    // Initialize tracing
    let filter = cli
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Run(args) => {
            let cancel = setup_signal_handlers();
            run(args, cancel).await
        }
        Command::Check(args) => check(&args.file).map(|_| ()),
        Command::Put(args) => put(&args.file, &args.conf_dir).await,
    };

    if let Err(e) = result {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

/// Bootstrap the registry against a simulated venue and pump match events
/// into it until cancelled.
async fn run(args: RunArgs, cancel: CancellationToken) -> synth_maker::Result<()> {
    let file = sim::VenueFile::load(&args.venue)?;
    let venue = Arc::new(file.build());
    let store = Arc::new(FileConfStore::open(&args.conf_dir)?);
    let services = MakerServices::new(venue.clone(), venue.clone());
    let registry = match args.seed {
        Some(seed) => Registry::with_seed(services, store, seed),
        None => Registry::new(services, store),
    };
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    info!(
        symbols = file.symbols.len(),
        deposits = file.deposits.len(),
        conf_dir = %args.conf_dir.display(),
        "venue ready"
    );

    // Subscribe before any maker can place an order.
    let mut events = venue.subscribe_events();
    registry.bootstrap().await?;

    let mut status = time::interval(Duration::from_millis(args.status_interval_ms.max(1)));
    status.tick().await;
    let taker_on = args.taker_interval_ms > 0;
    let mut taker = time::interval(Duration::from_millis(args.taker_interval_ms.max(1)));
    taker.tick().await;

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => registry.on_matched(&event).await,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "match feed lagging"),
                Err(RecvError::Closed) => break,
            },

            _ = status.tick() => log_status(&registry).await,

            _ = taker.tick(), if taker_on => {
                let targets: Vec<_> = registry
                    .list()
                    .await
                    .iter()
                    .map(|m| (m.config().user_id, m.symbol_info().clone()))
                    .collect();
                match sim::take_random(&venue, &targets, &mut rng) {
                    Some(Ok(order)) => info!(order = %order, "FILL"),
                    Some(Err(e)) => warn!(error = %e, "taker fill failed"),
                    None => {}
                }
            }

            _ = cancel.cancelled() => {
                info!("shutting down");
                break;
            }
        }
    }

    registry.stop_all().await;
    info!("all makers stopped");
    Ok(())
}

async fn log_status(registry: &Registry) {
    for maker in registry.list().await {
        let snap = maker.snapshot();
        let balances: Vec<String> = snap
            .balances
            .iter()
            .map(|b| format!("{}={}/{}", b.asset, b.free, b.locked))
            .collect();
        let (ask, bid) = snap
            .quote
            .map(|q| (q.ask.to_string(), q.bid.to_string()))
            .unwrap_or_else(|| ("--".into(), "--".into()));
        info!(
            symbol = %snap.symbol,
            mid = %snap.last_mid,
            ask,
            bid,
            orders = snap.open_orders,
            levels = snap.pending.len(),
            position = %snap.holding.map(|h| h.amount).unwrap_or_default(),
            balances = balances.join(","),
            "STATUS"
        );
    }
}

/// Decode and validate a config record, logging every violation.
fn check(file: &Path) -> synth_maker::Result<MakerConfig> {
    let bytes = std::fs::read(file).map_err(VenueError::from)?;
    let config = MakerConfig::decode(&bytes)?;
    let violations = config.violations();
    for v in &violations {
        error!(symbol = %config.symbol, "{v}");
    }
    config.validate()?;
    info!(symbol = %config.symbol, on = config.on, "config ok");
    Ok(config)
}

async fn put(file: &Path, conf_dir: &Path) -> synth_maker::Result<()> {
    let config = check(file)?;
    let store = FileConfStore::open(conf_dir)?;
    let key = config_key(&config.symbol);
    store.store(&key, &config.encode()?).await?;
    info!(key, dir = %conf_dir.display(), "config stored");
    Ok(())
}

/// Register SIGINT and SIGTERM handlers that trigger the returned token.
fn setup_signal_handlers() -> CancellationToken {
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received SIGINT, shutting down");
        cancel_clone.cancel();
    });

    #[cfg(unix)]
    {
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("received SIGTERM, shutting down");
                    cancel_clone.cancel();
                }
                Err(e) => warn!(error = %e, "failed to register SIGTERM handler"),
            }
        });
    }

    cancel
}
