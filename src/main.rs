mod cli;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use cli::{Cli, Command};
use farmout::activity::ActivityLogEntry;
use farmout::config::DispatchConfig;
use farmout::logging::{LogFormat, init_logging};
use farmout::state_machine::{Driver, DriverAvailability, ProgressStep, Reservation};
use farmout::status::{FarmoutMode, FarmoutStatus, canonicalize_mode, canonicalize_status};
use farmout::store::{InMemoryStore, ReservationFilter};
use farmout::{AutomationTrigger, Dispatcher};
use ui::{CountdownSpinner, DispatchConsole};

/// Offer lifetime for the part of the demo that lets an offer lapse.
const EXPIRING_OFFER_TTL: Duration = Duration::from_secs(2);
const WAIT_LIMIT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DispatchConfig::load()?;
    if let Some(ttl) = cli.ttl {
        config.offer_ttl_secs = ttl;
    }
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        config.log_format
    };
    init_logging(format, if cli.verbose { "debug" } else { "info" });

    let console = DispatchConsole::new();
    match cli.command {
        Command::Demo => run_demo(&config, &console).await,
        Command::Status { raw } => {
            for value in &raw {
                console.canonical_status(value, &canonicalize_status(value));
            }
            Ok(())
        }
        Command::Mode { raw } => {
            for value in &raw {
                console.canonical_mode(value, canonicalize_mode(value));
            }
            Ok(())
        }
    }
}

/// Hands eligible reservations to [`auto_dispatch`].
struct QueuedAutomation {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl AutomationTrigger for QueuedAutomation {
    async fn reservation_eligible(&self, reservation_id: &str, _mode: FarmoutMode) -> Result<()> {
        self.tx
            .send(reservation_id.to_string())
            .context("automatic dispatch worker stopped")
    }
}

/// Round-robin policy: offer each eligible reservation to the next
/// available driver on the roster. A reservation it cannot offer gives up
/// its automation slot.
async fn auto_dispatch(dispatcher: Dispatcher, mut rx: mpsc::UnboundedReceiver<String>, ttl: Duration) {
    let mut turn = 0usize;
    while let Some(id) = rx.recv().await {
        let drivers = match dispatcher.store().list_available_drivers().await {
            Ok(drivers) if !drivers.is_empty() => drivers,
            Ok(_) => {
                warn!(reservation_id = %id, "no driver available for automatic dispatch");
                dispatcher.release_automation(&id);
                continue;
            }
            Err(err) => {
                warn!(reservation_id = %id, error = %err, "could not load driver roster");
                dispatcher.release_automation(&id);
                continue;
            }
        };
        let driver = &drivers[turn % drivers.len()];
        turn += 1;
        match dispatcher.send_offer(&id, &driver.id, ttl).await {
            Ok(_) => {}
            Err(err) if err.is_benign_race() => {
                debug!(reservation_id = %id, error = %err, "reservation moved on before the automatic offer");
            }
            Err(err) => {
                warn!(reservation_id = %id, error = %err, "automatic offer failed");
                dispatcher.release_automation(&id);
            }
        }
    }
}

async fn run_demo(config: &DispatchConfig, console: &DispatchConsole) -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    for (id, name) in [("d-1", "Alvarez Livery"), ("d-2", "Brightline Cars")] {
        store.insert_driver(Driver::new(id, name))?;
    }
    let mut off_shift = Driver::new("d-3", "Coastal Sedans");
    off_shift.availability = DriverAvailability::Unavailable;
    store.insert_driver(off_shift)?;
    store.insert_reservation(Reservation::new("r-1001"))?;
    store.insert_reservation(Reservation::new("r-1002"))?;
    store.insert_reservation(Reservation::in_house("r-1003"))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(store.clone(), Arc::new(QueuedAutomation { tx }), config);
    tokio::spawn(auto_dispatch(dispatcher.clone(), rx, config.offer_ttl()));
    let mut feed = dispatcher.activity().subscribe();
    dispatcher.restore_timers().await?;

    console.heading("r-1001: offer, accept, complete");
    if let Err(err) = dispatcher.send_offer("r-1001", "d-3", config.offer_ttl()).await {
        console.rejected("offer to d-3", &err);
    }
    dispatcher.send_offer("r-1001", "d-1", config.offer_ttl()).await?;
    if let Err(err) = dispatcher.send_offer("r-1001", "d-2", config.offer_ttl()).await {
        console.rejected("second offer", &err);
    }
    dispatcher.driver_accepts("r-1001", "d-1", "v-sedan-7").await?;
    for step in [
        ProgressStep::Enroute,
        ProgressStep::Arrived,
        ProgressStep::PassengerOnboard,
        ProgressStep::Completed,
    ] {
        dispatcher.advance("r-1001", step).await?;
    }
    drain(&mut feed, console);

    console.heading("r-1002: offer expires");
    dispatcher.send_offer("r-1002", "d-2", EXPIRING_OFFER_TTL).await?;
    watch_countdown(&dispatcher, "r-1002").await?;
    drain(&mut feed, console);

    console.heading("r-1002: automatic dispatch");
    dispatcher.set_mode("r-1002", FarmoutMode::Automatic).await?;
    let offer = wait_for_offer(&dispatcher, "r-1002").await?;
    dispatcher.driver_declines("r-1002", &offer).await?;
    let offer = wait_for_offer(&dispatcher, "r-1002").await?;
    dispatcher.driver_accepts("r-1002", &offer, "v-van-2").await?;
    drain(&mut feed, console);

    console.heading("r-1003: in-house to farm-out, competing commands");
    dispatcher.switch_to_farm_out("r-1003").await?;
    let (assigned, offered) = tokio::join!(
        dispatcher.assign("r-1003", "d-2", "v-suv-1"),
        dispatcher.send_offer("r-1003", "d-1", config.offer_ttl()),
    );
    for (action, outcome) in [("assign to d-2", assigned), ("offer to d-1", offered)] {
        match outcome {
            Ok(_) => console.accepted(action),
            Err(err) => console.rejected(action, &err),
        }
    }
    drain(&mut feed, console);

    console.heading("farm-out board");
    for reservation in dispatcher.farmout_view(&ReservationFilter::default()).await? {
        console.reservation(&reservation);
    }
    console.audit("r-1002", &dispatcher.activity().for_reservation("r-1002"));
    Ok(())
}

/// Prints activity committed since the last call.
fn drain(feed: &mut broadcast::Receiver<ActivityLogEntry>, console: &DispatchConsole) {
    loop {
        match feed.try_recv() {
            Ok(entry) => console.entry(&entry),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "activity feed lagged");
            }
            Err(_) => break,
        }
    }
}

/// Follows the offer on `id` until it is gone.
async fn watch_countdown(dispatcher: &Dispatcher, id: &str) -> Result<()> {
    let Some(countdown) = dispatcher.offer_countdown(id).await? else {
        return Ok(());
    };
    let spinner = CountdownSpinner::start(&countdown);
    let deadline = tokio::time::Instant::now() + countdown.remaining + WAIT_LIMIT;
    while let Some(countdown) = dispatcher.offer_countdown(id).await? {
        if tokio::time::Instant::now() > deadline {
            spinner.finish();
            bail!("offer on {id} never expired");
        }
        spinner.update(&countdown);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    spinner.finish();
    Ok(())
}

/// Waits for automatic dispatch to put an offer on `id` and returns the
/// offered driver.
async fn wait_for_offer(dispatcher: &Dispatcher, id: &str) -> Result<String> {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        let reservation = dispatcher.reservation(id).await?;
        if reservation.farmout_status == Some(FarmoutStatus::Offered)
            && let Some(offer) = reservation.current_offer
        {
            return Ok(offer.driver_id);
        }
        if tokio::time::Instant::now() > deadline {
            bail!("no automatic offer for {id}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
