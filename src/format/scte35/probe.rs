//! SCTE-35 probe stage.
//!
//! Wraps the merge stage and fans its private observations out to
//! observers as public events per command type.

use super::merge::{Observation, Scte35Merge};
use super::types::{Scte35Event, SpliceCommand};

/// Public events the probe emits at splice points
#[derive(Debug, Clone)]
pub enum ProbeEvent {
    /// A splice-insert event fired
    Event(Scte35Event),
    /// A splice-null event fired
    Null(Scte35Event),
    /// A time-signal event fired
    Signal(Scte35Event),
}

impl ProbeEvent {
    fn from_expired(event: Scte35Event) -> Self {
        match event.command {
            SpliceCommand::Insert => ProbeEvent::Event(event),
            SpliceCommand::Null => ProbeEvent::Null(event),
            SpliceCommand::TimeSignal => ProbeEvent::Signal(event),
        }
    }
}

/// Probe stage: a star around the merge stage, not a cycle
pub struct Scte35Probe {
    merge: Scte35Merge,
}

impl Scte35Probe {
    /// Creates a probe with an empty merge stage inside
    pub fn new() -> Self {
        Self {
            merge: Scte35Merge::new(),
        }
    }

    /// Ingests an event; expirations triggered by the ingest surface as
    /// public events, ordered by arrival of the triggering operation
    pub fn input(&mut self, event: Scte35Event, now: u64) -> Vec<ProbeEvent> {
        Self::translate(self.merge.input(event, now))
    }

    /// Advances the clock, firing any splice points that passed
    pub fn tick(&mut self, now: u64) -> Vec<ProbeEvent> {
        Self::translate(self.merge.sweep(now))
    }

    /// Earliest pending splice point, for timer rearming
    pub fn next_expiration(&self) -> Option<u64> {
        self.merge.next_expiration()
    }

    /// Number of live events inside the merge stage
    pub fn live_events(&self) -> usize {
        self.merge.len()
    }

    fn translate(observations: Vec<Observation>) -> Vec<ProbeEvent> {
        observations
            .into_iter()
            .filter_map(|obs| match obs {
                Observation::Expired(event) => Some(ProbeEvent::from_expired(event)),
                Observation::Changed { .. } => None,
            })
            .collect()
    }
}

impl Default for Scte35Probe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::clock::UCLOCK_FREQ;

    #[test]
    fn test_auto_return_sequence() {
        let mut probe = Scte35Probe::new();
        let t = 1000 * UCLOCK_FREQ;
        let duration = 30 * UCLOCK_FREQ;

        let mut event = Scte35Event::insert(42);
        event.out_of_network = true;
        event.auto_return = true;
        event.duration = Some(duration);
        event.pts_prog = Some(t);
        event.pts_sys = Some(t);

        assert!(probe.input(event, 0).is_empty());
        assert_eq!(probe.next_expiration(), Some(t));

        // at T: EVENT(42) fires and the flipped event re-arms at T + 30 s
        let events = probe.tick(t + 1);
        match events.as_slice() {
            [ProbeEvent::Event(event)] => {
                assert_eq!(event.event_id, 42);
                assert!(event.out_of_network);
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(probe.next_expiration(), Some(t + duration));

        // at T + 30 s: EVENT(42) fires again and the event is deleted
        let events = probe.tick(t + duration + 1);
        match events.as_slice() {
            [ProbeEvent::Event(event)] => {
                assert_eq!(event.event_id, 42);
                assert!(!event.out_of_network);
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(probe.live_events(), 0);
        assert_eq!(probe.next_expiration(), None);
    }

    #[test]
    fn test_null_fires_immediately() {
        let mut probe = Scte35Probe::new();
        let events = probe.input(Scte35Event::null(), 5 * UCLOCK_FREQ);
        assert!(matches!(events.as_slice(), [ProbeEvent::Null(_)]));
    }
}
