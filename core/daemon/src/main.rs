//! saemubox daemon entrypoint.
//!
//! Bridges Pathfinder pin states to the automation target (UDP) and to the
//! playout engine's on-air flag (control socket). The Pathfinder read loop
//! runs on the main thread; a ticker thread handles forwarding and the
//! session watchdog.

use chrono::Utc;
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod backoff;
mod config;
mod error;
mod notifier;
mod onair;
mod session;
mod state;
mod watchdog;

use backoff::ReconnectBackoff;
use config::{load_config, ConfigOverrides};
use error::BridgeError;
use notifier::TargetNotifier;
use onair::OnAirController;
use session::{EventProcessor, PathfinderSession, SessionHandle};
use state::SharedState;
use watchdog::Watchdog;

#[derive(Parser)]
#[command(name = "saemubox-daemon")]
#[command(about = "Forward Pathfinder studio source changes to automation and playout")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults to <config dir>/saemubox/config.toml)
    #[arg(long, short, env = "SAEMUBOX_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        error!(error = %err, "saemubox daemon stopped");
        std::process::exit(1);
    }
}

fn init_logging() {
    let debug_enabled = env::var("SAEMUBOX_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: Cli) -> Result<(), BridgeError> {
    let mut config = load_config(cli.config.as_deref())?;
    config.apply(cli.overrides);
    config.validate()?;

    let state = Arc::new(SharedState::new());

    let notifier = if config.target.enabled {
        let notifier =
            TargetNotifier::connect(&config.target.address).map_err(|source| BridgeError::Setup {
                context: format!("connecting to target {}", config.target.address),
                source,
            })?;
        info!(target_addr = %notifier.target(), "Connected to target");
        Some(notifier)
    } else {
        info!("Target forwarding disabled");
        None
    };

    let on_air = OnAirController::from_config(&config.onair)?;
    info!(
        enabled = config.onair.enabled,
        address = %config.onair.address,
        "On-air control configured"
    );

    let handle = Arc::new(SessionHandle::new(config.pathfinder.device.clone()));
    let watchdog = Watchdog::new(Arc::clone(&handle), config.timing.watchdog_threshold()?);
    spawn_ticker(
        Arc::clone(&state),
        notifier,
        watchdog,
        config.timing.tick_interval(),
    );

    let processor = EventProcessor::new(Arc::clone(&state), on_air);
    let mut session = PathfinderSession::new(config.pathfinder.clone(), handle, processor);
    let result = session.run(ReconnectBackoff::new(&config.reconnect));
    info!(phase = ?session.phase(), "Pathfinder session ended");
    result
}

fn spawn_ticker(
    state: Arc<SharedState>,
    notifier: Option<TargetNotifier>,
    mut watchdog: Watchdog<SessionHandle>,
    interval: Duration,
) {
    thread::spawn(move || loop {
        if let Some(notifier) = &notifier {
            notifier.notify(state.selector());
        }
        watchdog.tick(&state, Utc::now());
        thread::sleep(interval);
    });
}
