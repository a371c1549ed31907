//! Transport-level scenarios: pixel packing, HBRMT framing and dual-NIC
//! redundancy.

use sdikit::av::{Outputs, Rational};
use sdikit::codec::PixelCodecs;
use sdikit::format::hbrmt::{HbrmtDepacketizer, HbrmtPacketizer};
use sdikit::format::rfc4175::{RasterConfig, Rfc4175Packetizer};
use sdikit::net::headers::{fill_headers, LinkAddress, NET_HEADERS_LEN};
use sdikit::net::{MockLink, MockNic, ReceiverMode, RedundantReceiver, RxRing};
use sdikit::sdi::DecoderOutput;

#[test]
fn test_pixel_roundtrip_12_pixels() {
    let codecs = PixelCodecs::new();

    // 12 pixels of UYVY10
    let y = [
        0x040u16, 0x3ff, 0x200, 0x1a5, 0x111, 0x222, 0x333, 0x0aa, 0x155, 0x2bc, 0x099, 0x3e1,
    ];
    let u = [0x200u16, 0x2aa, 0x123, 0x345, 0x00f, 0x3c0];
    let v = [0x0ffu16, 0x3c1, 0x210, 0x0c4, 0x17d, 0x29e];

    let mut uyvy = [0u16; 24];
    for j in 0..6 {
        uyvy[4 * j] = u[j];
        uyvy[4 * j + 1] = y[2 * j];
        uyvy[4 * j + 2] = v[j];
        uyvy[4 * j + 3] = y[2 * j + 1];
    }

    let mut packed = [0u8; 30];
    (codecs.uyvy_to_sdi)(&mut packed, &uyvy);

    let mut unpacked = [0u16; 24];
    (codecs.sdi_to_uyvy)(&packed, &mut unpacked);

    assert_eq!(unpacked, uyvy);
}

#[test]
fn test_hbrmt_frame_roundtrip_1080i25() {
    let fps = Rational::new(25, 1);
    let mut packetizer = HbrmtPacketizer::new();
    packetizer.set_format(1920, 1080, fps).unwrap();

    // a frame's worth of packed 10-bit payload
    let payload_len = 2640 * 1125 * 2 * 10 / 8;
    let payload: Vec<u8> = (0..payload_len).map(|i| (i * 31 % 251) as u8).collect();

    let packets = packetizer.packetize(&payload);
    assert!(packets.last().unwrap().marker());

    let mut depacketizer = HbrmtDepacketizer::new();
    let mut out = Outputs::new();
    for packet in &packets {
        depacketizer.push(packet.as_bytes(), &mut out).unwrap();
    }

    let units: Vec<_> = out.drain().collect();

    // one flow definition with fps 25/1, then one frame
    let flow_unit = &units[0].1;
    let flow = flow_unit.flow_def.as_ref().expect("flow definition");
    assert_eq!(flow.as_picture().unwrap().fps, fps);
    assert!(flow.as_picture().unwrap().latency > 0);

    assert_eq!(units.len(), 2);
    let frame = &units[1].1;
    assert_eq!(frame.block().unwrap().as_ref(), payload.as_slice());
    assert_eq!(frame.clock.pts_orig, Some(u64::from(u32::MAX)));
    assert_eq!(frame.clock.pts_prog, Some(u64::from(u32::MAX)));
}

#[test]
fn test_hbrmt_gap_resyncs_at_marker() {
    let fps = Rational::new(25, 1);
    let mut packetizer = HbrmtPacketizer::new();
    packetizer.set_format(1920, 1080, fps).unwrap();

    let payload_len = 2640 * 1125 * 2 * 10 / 8;
    let payload = vec![0x5au8; payload_len];

    let first = packetizer.packetize(&payload);
    let second = packetizer.packetize(&payload);

    let mut depacketizer = HbrmtDepacketizer::new();
    let mut out = Outputs::new();

    // drop a packet in the middle of the first frame
    for (i, packet) in first.iter().enumerate() {
        if i == 100 {
            continue;
        }
        depacketizer.push(packet.as_bytes(), &mut out).unwrap();
    }
    // the damaged frame is dropped
    let emitted: Vec<_> = out.drain().filter(|(_, u)| u.flow_def.is_none()).collect();
    assert!(emitted.is_empty());

    // the next full frame comes out whole
    for packet in &second {
        depacketizer.push(packet.as_bytes(), &mut out).unwrap();
    }
    let emitted: Vec<_> = out.drain().filter(|(_, u)| u.flow_def.is_none()).collect();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].1.block().unwrap().len(), payload_len);
}

fn wrap_eth(rtp: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; NET_HEADERS_LEN + rtp.len()];
    fill_headers(&mut frame, &LinkAddress::default(), rtp.len() as u16);
    frame[NET_HEADERS_LEN..].copy_from_slice(rtp);
    frame
}

#[test]
fn test_dual_nic_offset_streams_merge_seamlessly() {
    let config = RasterConfig {
        width: 1920,
        height: 1080,
        fps: Rational::new(25, 1),
        interlaced: true,
    };
    let mut packetizer = Rfc4175Packetizer::new(config);

    let mut pic = sdikit::av::Picture {
        width: 1920,
        height: 1080,
        planes: vec![
            sdikit::av::Plane::new_b16(sdikit::av::CHROMA_Y10, 1920, 1080),
            sdikit::av::Plane::new_b16(sdikit::av::CHROMA_U10, 960, 1080),
            sdikit::av::Plane::new_b16(sdikit::av::CHROMA_V10, 960, 1080),
        ],
    };
    for row in 0..1080 {
        for (i, s) in pic.planes[0].row16_mut(row).iter_mut().enumerate() {
            *s = ((row + i) % 1015) as u16 + 4;
        }
    }

    let packets = packetizer.packetize(&pic).unwrap();

    let mut receiver = RedundantReceiver::new(ReceiverMode::Rfc4175 {
        config,
        output: DecoderOutput::Planar10,
    });

    // identical streams, the second lagging by 10 packets
    let nic0 = MockNic::new(MockLink::new(true));
    let nic1 = MockNic::new(MockLink::new(true));
    for p in &packets {
        nic0.inject(wrap_eth(p));
    }
    for p in &packets[..packets.len() - 10] {
        nic1.inject(wrap_eth(p));
    }
    receiver.add_path(0, Box::new(nic0), RxRing::new());
    receiver.add_path(1, Box::new(nic1), RxRing::new());

    let mut out = Outputs::new();
    receiver.tick(0, &mut out);

    let frames: Vec<_> = out.drain().collect();
    assert_eq!(frames.len(), 1);
    assert!(!frames[0].1.discontinuity);
    assert_eq!(receiver.discontinuity_drops(), 0);
    assert_eq!(receiver.frames_emitted(), 1);

    // either ring alone delivered the payload once
    let got = frames[0].1.picture().unwrap();
    for row in 0..1080 {
        assert_eq!(
            got.planes[0].row16(row),
            pic.planes[0].row16(row),
            "row {row}"
        );
    }
}
