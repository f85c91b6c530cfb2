//! Background silent refresh.

use super::{SessionInner, SyncSession};
use crate::error::SyncError;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Spawn the poll loop. It holds only a weak reference, so it ends on its
/// own once every session handle is gone; teardown ends it through
/// `shutdown`. A refresh in flight is dropped when shutdown arrives.
pub(super) fn spawn(
    session: Weak<SessionInner>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let Some(inner) = session.upgrade() else {
                break;
            };
            let handle = SyncSession { inner };
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = handle.refresh(true) => match result {
                    Ok(_) => {}
                    Err(SyncError::TornDown) => break,
                    Err(err) => log::warn!("background refresh failed: {}", err),
                },
            }
        }
        log::debug!("poller stopped");
    })
}
