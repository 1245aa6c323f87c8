//! `ScaleEventSink` stamps scale-lifecycle events onto a status
//! sub-document.

use chrono::{DateTime, Utc};

use crate::types::{ScaleEvent, ScaleToZeroStatus};

/// A source of the current time, injectable so tests can stamp deterministic
/// events.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock, used by the real controller.
#[derive(Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fixed clock for deterministic tests.
#[derive(Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Stateless stamper: given an event, produce the `scaleToZero` sub-document that
/// records it.
pub struct ScaleEventSink<C: Clock = WallClock> {
    clock: C,
}

impl ScaleEventSink<WallClock> {
    pub fn new() -> Self {
        ScaleEventSink { clock: WallClock }
    }
}

impl Default for ScaleEventSink<WallClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ScaleEventSink<C> {
    pub fn with_clock(clock: C) -> Self {
        ScaleEventSink { clock }
    }

    /// Stamp `event` with the sink's current time.
    pub fn stamp(&self, event: ScaleEvent) -> ScaleToZeroStatus {
        ScaleToZeroStatus {
            last_scale_event: Some(event),
            last_scale_event_time: Some(self.clock.now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stamp_uses_injected_clock() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let sink = ScaleEventSink::with_clock(FixedClock(t));
        let status = sink.stamp(ScaleEvent::ResourceUpdated);
        assert_eq!(status.last_scale_event, Some(ScaleEvent::ResourceUpdated));
        assert_eq!(status.last_scale_event_time, Some(t));
    }
}
