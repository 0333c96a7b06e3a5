use courtside_booking::BookingOrchestrator;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

/// Periodic housekeeping: expire lapsed holds, push gathered open games to
/// payment, complete finished bookings.
pub fn spawn_sweeper(engine: Arc<BookingOrchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = every.as_millis() as u64, "sweep worker started");

        loop {
            ticker.tick().await;
            let report = engine.sweep().await;
            if report.is_empty() {
                debug!("sweep: nothing to do");
            }
        }
    })
}
