//! SCTE-35 end-to-end scenarios: splice lifecycle through the probe and
//! generator cadence.

use sdikit::av::clock::UCLOCK_FREQ;
use sdikit::format::scte35::{
    section, ProbeEvent, Scte35Event, Scte35Generator, Scte35Probe,
};

#[test]
fn test_splice_insert_auto_return_lifecycle() {
    let mut probe = Scte35Probe::new();

    let t = 3600 * UCLOCK_FREQ;
    let duration = 30 * UCLOCK_FREQ;

    let mut event = Scte35Event::insert(42);
    event.out_of_network = true;
    event.auto_return = true;
    event.duration = Some(duration);
    event.pts_prog = Some(t);
    event.pts_sys = Some(t);

    // nothing fires before the splice point
    assert!(probe.input(event, t - UCLOCK_FREQ).is_empty());
    assert!(probe.tick(t - 1).is_empty());

    // at T the out-of-network event fires and a flipped return event
    // re-arms at T + duration
    let fired = probe.tick(t + 1);
    match fired.as_slice() {
        [ProbeEvent::Event(event)] => {
            assert_eq!(event.event_id, 42);
            assert!(event.out_of_network);
            assert!(event.auto_return);
        }
        other => panic!("unexpected events: {other:?}"),
    }
    assert_eq!(probe.next_expiration(), Some(t + duration));

    // at T + duration the return event fires and the event disappears
    let fired = probe.tick(t + duration + 1);
    match fired.as_slice() {
        [ProbeEvent::Event(event)] => {
            assert_eq!(event.event_id, 42);
            assert!(!event.out_of_network);
        }
        other => panic!("unexpected events: {other:?}"),
    }
    assert_eq!(probe.live_events(), 0);
}

#[test]
fn test_generator_cadence_over_ten_seconds() {
    let mut generator = Scte35Generator::new();
    generator.set_interval(UCLOCK_FREQ);

    // mux ticks every 10 ms for 10 s with no input
    let mut sections = Vec::new();
    let mut last_cr = None;
    for tick in 1..=1000u64 {
        let cr_sys = tick * UCLOCK_FREQ / 100;
        for unit in generator.prepare(cr_sys) {
            if let Some(prev) = last_cr {
                let gap = cr_sys - prev;
                assert!(
                    gap >= UCLOCK_FREQ && gap <= UCLOCK_FREQ + UCLOCK_FREQ / 100,
                    "sections {gap} ticks apart"
                );
            }
            last_cr = Some(cr_sys);
            sections.push(unit);
        }
    }

    // exactly one splice-null per second
    assert_eq!(sections.len(), 10);
    for unit in &sections {
        let block = unit.block().unwrap();
        assert_eq!(block[0], 0xfc);
        assert_eq!(block[13], 0x00, "splice_null");
        assert!(section::check_section_crc(block), "valid CRC-32/MPEG-2");
        assert!(unit.clock.cr_sys.is_some());
    }
}

#[test]
fn test_generator_reemits_live_event_within_interval() {
    let mut generator = Scte35Generator::new();
    generator.set_interval(UCLOCK_FREQ);

    let mut event = Scte35Event::insert(7);
    event.pts_prog = Some(100 * UCLOCK_FREQ);
    event.pts_sys = Some(100 * UCLOCK_FREQ);
    generator.input(&event);

    let mut inserts = 0;
    let mut nulls = 0;
    for tick in 1..=500u64 {
        let cr_sys = tick * UCLOCK_FREQ / 100; // 5 s of ticks
        for unit in generator.prepare(cr_sys) {
            match unit.block().unwrap()[13] {
                0x05 => inserts += 1,
                0x00 => nulls += 1,
                other => panic!("unexpected command {other}"),
            }
        }
    }

    // a live event fully replaces the null keep-alive
    assert_eq!(nulls, 0);
    assert!(inserts >= 5);
}
