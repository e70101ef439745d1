//! Selector state shared between the Pathfinder read loop and the ticker.
//!
//! The read loop is the only writer. The two fields are independent atomics;
//! a reader may see the selector change just before or after the timestamp.

use chrono::{DateTime, TimeZone, Utc};
use saemubox_protocol::TargetSelector;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

pub struct SharedState {
    selector: AtomicU8,
    last_event_millis: AtomicI64,
}

impl SharedState {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            selector: AtomicU8::new(TargetSelector::Unknown.as_u8()),
            last_event_millis: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub fn selector(&self) -> TargetSelector {
        TargetSelector::from_u8(self.selector.load(Ordering::Acquire))
    }

    pub fn last_event_time(&self) -> DateTime<Utc> {
        let millis = self.last_event_millis.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Records an accepted selector update. `Unknown` is ignored.
    pub fn record(&self, selector: TargetSelector, at: DateTime<Utc>) -> bool {
        if !selector.is_known() {
            return false;
        }
        self.selector.store(selector.as_u8(), Ordering::Release);
        self.last_event_millis
            .store(at.timestamp_millis(), Ordering::Release);
        true
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_unknown_with_current_timestamp() {
        let now = Utc::now();
        let state = SharedState::starting_at(now);
        assert_eq!(state.selector(), TargetSelector::Unknown);
        assert_eq!(
            state.last_event_time().timestamp_millis(),
            now.timestamp_millis()
        );
    }

    #[test]
    fn record_updates_selector_and_timestamp() {
        let start = Utc::now() - Duration::hours(2);
        let state = SharedState::starting_at(start);
        let now = Utc::now();

        assert!(state.record(TargetSelector::Klangbecken, now));
        assert_eq!(state.selector(), TargetSelector::Klangbecken);
        assert_eq!(
            state.last_event_time().timestamp_millis(),
            now.timestamp_millis()
        );
    }

    #[test]
    fn record_ignores_unknown() {
        let start = Utc::now() - Duration::hours(2);
        let state = SharedState::starting_at(start);
        state.record(TargetSelector::StudioLive, start);

        assert!(!state.record(TargetSelector::Unknown, Utc::now()));
        assert_eq!(state.selector(), TargetSelector::StudioLive);
        assert_eq!(
            state.last_event_time().timestamp_millis(),
            start.timestamp_millis()
        );
    }

    #[test]
    fn concurrent_readers_only_observe_valid_selectors() {
        let state = Arc::new(SharedState::new());
        let writer_state = Arc::clone(&state);
        let writer = thread::spawn(move || {
            for index in 0..1_000 {
                let selector = if index % 2 == 0 {
                    TargetSelector::Klangbecken
                } else {
                    TargetSelector::StudioLive
                };
                writer_state.record(selector, Utc::now());
            }
        });

        for _ in 0..1_000 {
            let selector = state.selector();
            assert!(matches!(
                selector,
                TargetSelector::Unknown | TargetSelector::Klangbecken | TargetSelector::StudioLive
            ));
        }
        writer.join().expect("writer thread");
        assert_eq!(state.selector(), TargetSelector::StudioLive);
    }
}
