//! SCTE-35 merge stage.
//!
//! Tracks the set of live splice events against the system clock:
//! deduplicates repeated sections, reports changes, expires events whose
//! splice time has passed and flips auto-return breaks back to the
//! opposite out-of-network polarity.

use super::types::{Scte35Event, SegmentationDescriptor, SpliceCommand};
use crate::av::clock::WallClock;

/// Private observations the merge stage emits; the probe stage turns
/// these into public events
#[derive(Debug, Clone)]
pub enum Observation {
    /// An event appeared or was updated
    Changed {
        /// The previous state, if the event existed
        old: Option<Scte35Event>,
        /// The new state
        new: Scte35Event,
    },
    /// An event's splice time has passed
    Expired(Scte35Event),
}

/// Merge stage state: the live event set and a UTC anchor for reporting
pub struct Scte35Merge {
    events: Vec<Scte35Event>,
    utc: WallClock,
}

impl Scte35Merge {
    /// Creates an empty merge stage
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            utc: WallClock::new(),
        }
    }

    /// Number of live events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true when no events are live
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn find_event(&self, event: &Scte35Event) -> Option<usize> {
        self.events.iter().position(|prev| {
            if prev.command != event.command {
                return false;
            }
            match event.command {
                SpliceCommand::Insert => prev.event_id == event.event_id,
                SpliceCommand::TimeSignal => prev.pts_orig == event.pts_orig,
                SpliceCommand::Null => false,
            }
        })
    }

    /// Removes descriptors of older events that the incoming event
    /// supersedes (same segmentation event id)
    fn update_descriptors(&mut self, event: &Scte35Event) -> Vec<Observation> {
        let incoming_ids: Vec<u32> = event
            .descriptors
            .iter()
            .filter_map(|d| SegmentationDescriptor::event_id_of(d))
            .collect();
        if incoming_ids.is_empty() {
            return Vec::new();
        }

        let mut observations = Vec::new();
        for prev in &mut self.events {
            if prev.command != event.command {
                continue;
            }
            let before = prev.descriptors.len();
            prev.descriptors.retain(|d| {
                SegmentationDescriptor::event_id_of(d)
                    .map(|id| !incoming_ids.contains(&id))
                    .unwrap_or(true)
            });
            if prev.descriptors.len() != before {
                log::debug!("update previous descriptor");
                observations.push(Observation::Changed {
                    old: Some(prev.clone()),
                    new: prev.clone(),
                });
            }
        }
        observations
    }

    /// Ingests one SCTE-35 event and sweeps expirations at `now`.
    ///
    /// Unchanged duplicates are silently dropped; changes are reported
    /// with their previous state.
    pub fn input(&mut self, mut event: Scte35Event, now: u64) -> Vec<Observation> {
        if event.command == SpliceCommand::Null {
            // null commands carry no dates
            event.pts_orig = None;
            event.pts_prog = None;
            event.pts_sys = None;
        }

        let mut observations = self.update_descriptors(&event);

        match self.find_event(&event) {
            Some(idx) => {
                let prev = self.events.remove(idx);
                let unchanged = !prev.splice_fields_differ(&event)
                    && prev.descriptors == event.descriptors;
                if unchanged {
                    // silently dropped; the previous event stays live
                    self.events.push(prev);
                } else {
                    let mut event = event;
                    // merged events inherit the descriptors already seen
                    for desc in &prev.descriptors {
                        if !event.descriptors.contains(desc) {
                            event.descriptors.push(desc.clone());
                        }
                    }
                    observations.push(Observation::Changed {
                        old: Some(prev),
                        new: event.clone(),
                    });
                    self.events.push(event);
                }
            }
            None => {
                observations.push(Observation::Changed {
                    old: None,
                    new: event.clone(),
                });
                self.events.push(event);
            }
        }

        observations.extend(self.sweep(now));
        observations
    }

    /// Expires events whose system time has passed.
    ///
    /// Auto-return breaks with a duration flip to the opposite
    /// out-of-network polarity and re-arm at `pts_sys + duration`; other
    /// expired events are deleted.
    pub fn sweep(&mut self, now: u64) -> Vec<Observation> {
        let mut observations = Vec::new();
        let mut kept = Vec::with_capacity(self.events.len());

        for mut event in self.events.drain(..) {
            let expired = match event.pts_sys {
                None => true,
                Some(pts) => pts < now,
            };
            if !expired {
                kept.push(event);
                continue;
            }

            log::debug!(
                "event {} expired at {}",
                event.event_id,
                self.utc.to_utc(now).to_rfc3339()
            );
            observations.push(Observation::Expired(event.clone()));

            match (event.auto_return, event.duration) {
                (true, Some(duration)) => {
                    event.auto_return = false;
                    event.out_of_network = !event.out_of_network;
                    event.pts_sys = Some(event.pts_sys.unwrap_or(now) + duration);
                    event.duration = None;
                    kept.push(event);
                }
                _ => {}
            }
        }

        self.events = kept;
        observations
    }

    /// Earliest remaining expiration, for timer rearming
    pub fn next_expiration(&self) -> Option<u64> {
        self.events.iter().filter_map(|e| e.pts_sys).min()
    }
}

impl Default for Scte35Merge {
    fn default() -> Self {
        Self::new()
    }
}
