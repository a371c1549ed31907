//! SCTE-35 section generator.
//!
//! Builds one splice section per prepared output tick: live events are
//! re-emitted at the configured interval, time-signal events sharing a
//! PTS aggregate into one section, and a precomputed splice-null section
//! keeps the PID alive when nothing fires in the window.

use super::section::build_section;
use super::types::{Scte35Event, SegmentationDescriptor, SpliceCommand};
use crate::av::{FrameUnit, Payload};
use bytes::BytesMut;

/// Flow definition tag of the emitted sections
pub const SECTION_FLOW_DEF: &str = "block.mpegtspsi.mpegtsscte35.";

#[derive(Debug)]
struct Message {
    /// system time of the splice point
    cr_sys: u64,
    event: Scte35Event,
    command: SpliceCommand,
    id: u64,
    sent: bool,
}

/// Interval-driven SCTE-35 section generator
pub struct Scte35Generator {
    interval: u64,
    last_cr_sys: u64,
    null_section: BytesMut,
    messages: Vec<Message>,
}

impl Scte35Generator {
    /// Creates a generator; the interval starts at zero (sections are
    /// only garbage collected until one is set)
    pub fn new() -> Self {
        Self {
            interval: 0,
            last_cr_sys: 0,
            null_section: build_section(&Scte35Event::null()),
            messages: Vec::new(),
        }
    }

    /// Sets the minimum re-emission interval in 27 MHz ticks
    pub fn set_interval(&mut self, interval: u64) {
        self.interval = interval;
    }

    /// Current re-emission interval
    pub fn interval(&self) -> u64 {
        self.interval
    }

    fn find_message(&self, command: SpliceCommand, id: u64) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.command == command && m.id == id)
    }

    fn input_splice_insert(&mut self, event: &Scte35Event) {
        let id = u64::from(event.event_id);
        let cr_sys = event.pts_sys.unwrap_or(0);

        match self.find_message(SpliceCommand::Insert, id) {
            None => {
                log::info!("now using splice insert event {id}");
                self.messages.push(Message {
                    cr_sys,
                    event: event.clone(),
                    command: SpliceCommand::Insert,
                    id,
                    sent: false,
                });
                // force sending the table immediately
                self.last_cr_sys = 0;
            }
            Some(idx) => {
                let msg = &mut self.messages[idx];
                if msg.event.splice_fields_differ(event) {
                    log::debug!("updating splice insert event {id}");
                    msg.event = event.clone();
                    msg.sent = false;
                    msg.cr_sys = cr_sys;
                    self.last_cr_sys = 0;
                } else {
                    log::trace!("ignore duplicate splice insert event {id}");
                    msg.cr_sys = cr_sys;
                }
            }
        }
    }

    fn input_time_signal(&mut self, event: &Scte35Event) {
        let cr_sys = event.pts_sys.unwrap_or(0);

        for desc in &event.descriptors {
            let Some(event_id) = SegmentationDescriptor::event_id_of(desc) else {
                continue;
            };
            let id = u64::from(event_id);

            let mut single = event.clone();
            single.descriptors = vec![desc.clone()];

            match self.find_message(SpliceCommand::TimeSignal, id) {
                None => {
                    log::info!("now using time signal event {id}");
                    self.messages.push(Message {
                        cr_sys,
                        event: single,
                        command: SpliceCommand::TimeSignal,
                        id,
                        sent: false,
                    });
                    self.last_cr_sys = 0;
                }
                Some(idx) => {
                    let msg = &mut self.messages[idx];
                    if msg.event.descriptors != single.descriptors
                        || msg.event.pts_prog != single.pts_prog
                    {
                        log::debug!("updating time signal event {id}");
                        msg.event = single;
                        msg.sent = false;
                        msg.cr_sys = cr_sys;
                        self.last_cr_sys = 0;
                    } else {
                        log::trace!("ignore duplicate time signal event {id}");
                        msg.cr_sys = cr_sys;
                    }
                }
            }
        }
    }

    /// Ingests one merged event
    pub fn input(&mut self, event: &Scte35Event) {
        match event.command {
            SpliceCommand::Insert => self.input_splice_insert(event),
            SpliceCommand::TimeSignal => self.input_time_signal(event),
            SpliceCommand::Null => {
                log::info!("now using splice_null command due to empty event");
            }
        }
    }

    fn emit(&mut self, section: BytesMut, cr_sys: u64) -> FrameUnit {
        self.last_cr_sys = cr_sys;
        let mut unit = FrameUnit::new(Payload::Block(section));
        unit.clock.cr_sys = Some(cr_sys);
        unit.attributes
            .insert("def".to_string(), SECTION_FLOW_DEF.to_string());
        unit
    }

    /// Prepares the sections for the mux tick at `cr_sys`.
    ///
    /// Returns the sections to emit: the live set when a message is
    /// pending (or its re-emission interval elapsed), otherwise one
    /// splice-null section per interval.
    pub fn prepare(&mut self, cr_sys: u64) -> Vec<FrameUnit> {
        if self.interval == 0 {
            // no output configured; only garbage-collect expired messages
            self.messages.retain(|m| {
                if m.cr_sys < cr_sys {
                    log::debug!(
                        "event {} {}",
                        m.id,
                        if m.sent { "expired" } else { "ignored" }
                    );
                    false
                } else {
                    true
                }
            });
            return Vec::new();
        }

        if self.last_cr_sys + self.interval > cr_sys {
            return Vec::new();
        }

        let mut outputs = Vec::new();
        let mut handled = false;

        let mut messages = std::mem::take(&mut self.messages);
        let mut consumed = vec![false; messages.len()];
        for i in 0..messages.len() {
            if consumed[i] {
                continue;
            }
            if messages[i].cr_sys < cr_sys && messages[i].sent {
                continue;
            }

            let mut event = messages[i].event.clone();
            let name = match messages[i].command {
                SpliceCommand::Insert => "splice insert",
                SpliceCommand::TimeSignal => "time signal",
                SpliceCommand::Null => "(invalid)",
            };

            if messages[i].cr_sys < cr_sys {
                log::info!("sending a {name} immediate event {}", messages[i].id);
                event.pts_prog = None;
            } else if messages[i].sent {
                log::debug!("resending a {name} event {}", messages[i].id);
            } else {
                log::info!("sending a {name} event {}", messages[i].id);
            }
            messages[i].sent = true;

            if messages[i].command == SpliceCommand::TimeSignal {
                // aggregate the other time signals sharing this PTS
                let pts = messages[i].event.pts_prog;
                for j in 0..messages.len() {
                    if j == i
                        || messages[j].command != SpliceCommand::TimeSignal
                        || messages[j].event.pts_prog != pts
                    {
                        continue;
                    }
                    if messages[j].cr_sys < cr_sys && messages[j].sent {
                        continue;
                    }
                    consumed[j] = true;
                    if let Some(desc) = messages[j].event.descriptors.first() {
                        if messages[j].sent {
                            log::debug!(
                                "reaggregating {name} event {} to event {}",
                                messages[j].id,
                                messages[i].id
                            );
                        } else {
                            log::info!(
                                "aggregating {name} event {} to event {}",
                                messages[j].id,
                                messages[i].id
                            );
                        }
                        event.descriptors.push(desc.clone());
                        messages[j].sent = true;
                    }
                }
            }

            outputs.push(self.emit(build_section(&event), cr_sys));
            handled = true;
        }

        // expired messages leave the list once sent
        messages.retain(|m| {
            if m.cr_sys < cr_sys {
                log::info!("event {} expired", m.id);
                false
            } else {
                true
            }
        });
        self.messages = messages;

        if !handled {
            let null = self.null_section.clone();
            outputs.push(self.emit(null, cr_sys));
        }

        outputs
    }
}

impl Default for Scte35Generator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::clock::UCLOCK_FREQ;
    use crate::format::scte35::section::check_section_crc;

    #[test]
    fn test_null_cadence() {
        let mut generator = Scte35Generator::new();
        generator.set_interval(UCLOCK_FREQ); // 1 second

        // ticks every 100 ms over 10 s: exactly 10 null sections
        let mut sections = Vec::new();
        for tick in 0..100u64 {
            let cr_sys = (tick + 1) * UCLOCK_FREQ / 10;
            sections.extend(generator.prepare(cr_sys));
        }

        assert_eq!(sections.len(), 10);
        for unit in &sections {
            let block = unit.block().unwrap();
            assert!(check_section_crc(block));
            // splice_null command
            assert_eq!(block[13], 0x00);
            assert_eq!(
                unit.attributes.get("def").map(String::as_str),
                Some(SECTION_FLOW_DEF)
            );
        }
    }

    #[test]
    fn test_live_event_replaces_null() {
        let mut generator = Scte35Generator::new();
        generator.set_interval(UCLOCK_FREQ);

        let mut event = Scte35Event::insert(7);
        event.pts_prog = Some(500 * UCLOCK_FREQ);
        event.pts_sys = Some(500 * UCLOCK_FREQ);
        generator.input(&event);

        // forced immediate emission
        let sections = generator.prepare(UCLOCK_FREQ / 10);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].block().unwrap()[13], 0x05);

        // unchanged duplicate does not force a resend before the interval
        generator.input(&event);
        assert!(generator.prepare(UCLOCK_FREQ / 5).is_empty());

        // after the interval the event is resent
        let sections = generator.prepare(UCLOCK_FREQ / 10 + UCLOCK_FREQ + 1);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].block().unwrap()[13], 0x05);
    }

    #[test]
    fn test_time_signals_aggregate_by_pts() {
        let mut generator = Scte35Generator::new();
        generator.set_interval(UCLOCK_FREQ);

        let pts = 900 * UCLOCK_FREQ;
        let mut signal = Scte35Event::time_signal(pts);
        signal.pts_sys = Some(pts);
        signal.descriptors = vec![
            SegmentationDescriptor {
                event_id: 1,
                cancel: false,
                delivery_not_restricted: true,
                duration: None,
                upid_type: 0,
                upid: vec![],
                type_id: 0x22,
                num: 0,
                expected: 0,
                sub_num: None,
                sub_expected: None,
            }
            .to_bytes(),
            SegmentationDescriptor {
                event_id: 2,
                cancel: false,
                delivery_not_restricted: true,
                duration: None,
                upid_type: 0,
                upid: vec![],
                type_id: 0x23,
                num: 0,
                expected: 0,
                sub_num: None,
                sub_expected: None,
            }
            .to_bytes(),
        ];
        generator.input(&signal);

        // two tracked messages, one aggregated section
        let sections = generator.prepare(UCLOCK_FREQ / 10);
        assert_eq!(sections.len(), 1);
        let block = sections[0].block().unwrap();
        assert!(check_section_crc(block));
        assert_eq!(block[13], 0x06);
    }
}
