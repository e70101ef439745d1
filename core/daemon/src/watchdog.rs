//! Resubscribes when the panel has gone quiet for too long.
//!
//! A rebooted panel keeps the TCP connection open but forgets our
//! subscription. Resubscribing is skipped while the Klangbecken is selected
//! because the panel's answer would re-trigger the on-air start in playout.

use chrono::{DateTime, Duration, Utc};
use saemubox_protocol::TargetSelector;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::SharedState;

pub trait Resubscribe {
    fn resubscribe(&self) -> io::Result<()>;
}

pub struct Watchdog<R> {
    session: Arc<R>,
    threshold: Duration,
    last_resubscribe: Option<DateTime<Utc>>,
}

impl<R: Resubscribe> Watchdog<R> {
    pub fn new(session: Arc<R>, threshold: Duration) -> Self {
        Self {
            session,
            threshold,
            last_resubscribe: None,
        }
    }

    fn is_due(&self, state: &SharedState, now: DateTime<Utc>) -> bool {
        if state.selector() == TargetSelector::Klangbecken {
            return false;
        }
        let last_activity = match self.last_resubscribe {
            Some(at) => at.max(state.last_event_time()),
            None => state.last_event_time(),
        };
        now.signed_duration_since(last_activity) > self.threshold
    }

    /// Returns true when a resubscribe was issued on this tick.
    pub fn tick(&mut self, state: &SharedState, now: DateTime<Utc>) -> bool {
        if !self.is_due(state, now) {
            return false;
        }

        match self.session.resubscribe() {
            Ok(()) => {
                info!(
                    last_event = %state.last_event_time().to_rfc3339(),
                    "No Pathfinder events for too long; resubscribed"
                );
                self.last_resubscribe = Some(now);
                true
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                debug!("Skipping resubscribe while Pathfinder is disconnected");
                false
            }
            Err(err) => {
                warn!(error = %err, "Pathfinder resubscribe failed");
                false
            }
        }
    }
}
