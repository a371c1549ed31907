//! Full-frame SDI encode/decode roundtrips.

use sdikit::av::{
    FlowDefinition, FrameUnit, Outputs, Picture, PictureFlow, Plane, PlaneDef, Port, Rational,
    SoundBuffer, Stage, CHROMA_U10, CHROMA_V10, CHROMA_Y10,
};
use sdikit::sdi::{DecoderOutput, SdiDecoder, SdiEncoder};

fn planar10_flow(hsize: u32, vsize: u32, fps: Rational) -> FlowDefinition {
    FlowDefinition::Picture(PictureFlow {
        hsize,
        vsize,
        fps,
        macropixel: 1,
        planes: vec![
            PlaneDef { tag: CHROMA_Y10, hsub: 1, vsub: 1, macropixel_size: 2 },
            PlaneDef { tag: CHROMA_U10, hsub: 2, vsub: 1, macropixel_size: 2 },
            PlaneDef { tag: CHROMA_V10, hsub: 2, vsub: 1, macropixel_size: 2 },
        ],
        progressive: false,
        tff: true,
        latency: 0,
    })
}

fn make_picture(width: usize, height: usize) -> Picture {
    let mut pic = Picture {
        width: width as u32,
        height: height as u32,
        planes: vec![
            Plane::new_b16(CHROMA_Y10, width, height),
            Plane::new_b16(CHROMA_U10, width / 2, height),
            Plane::new_b16(CHROMA_V10, width / 2, height),
        ],
    };
    for row in 0..height {
        for (i, s) in pic.planes[0].row16_mut(row).iter_mut().enumerate() {
            *s = ((row * 13 + i * 7) % 1015) as u16 + 4;
        }
        for (i, s) in pic.planes[1].row16_mut(row).iter_mut().enumerate() {
            *s = ((row * 5 + i * 11) % 1015) as u16 + 4;
        }
        for (i, s) in pic.planes[2].row16_mut(row).iter_mut().enumerate() {
            *s = ((row * 3 + i * 17) % 1015) as u16 + 4;
        }
    }
    pic
}

/// 24-bit audio: low byte zero so embedding at 24 bits is lossless
fn make_audio(frames: usize) -> SoundBuffer {
    let mut sound = SoundBuffer::silence(16, frames);
    for f in 0..frames {
        for c in 0..16 {
            let value = ((f * 31 + c * 7) % 1000) as i32 - 500;
            sound.samples[f * 16 + c] = value * 256;
        }
    }
    sound
}

fn encode_one(
    flow: &FlowDefinition,
    pic: Picture,
    audio: Option<&SoundBuffer>,
) -> FrameUnit {
    let mut encoder = SdiEncoder::new();
    encoder.set_input_format(flow).unwrap();
    if let Some(audio) = audio {
        encoder.queue_audio(audio, 0, false);
    }

    let mut out = Outputs::new();
    encoder
        .push_frame(
            FrameUnit::new(sdikit::av::Payload::Picture(pic)).with_pts_sys(0),
            &mut out,
        )
        .unwrap();

    let (port, unit) = out.drain().next().unwrap();
    assert_eq!(port, Port::Main);
    unit
}

#[test]
fn test_hd_frame_structure() {
    let flow = planar10_flow(1920, 1080, Rational::new(25, 1));
    let encoded = encode_one(&flow, make_picture(1920, 1080), None);
    let block = encoded.block().unwrap();

    // exactly full_height x full_width x 2 samples x 2 bytes
    assert_eq!(block.len(), 1125 * 2640 * 4);

    // every line begins with the HD EAV sequence
    for h in 0..1125 {
        let base = h * 2640 * 4;
        let word = |i: usize| {
            u16::from_le_bytes([block[base + 2 * i], block[base + 2 * i + 1]])
        };
        assert_eq!(word(0), 0x3ff, "line {h}");
        assert_eq!(word(1), 0x3ff, "line {h}");
        assert_eq!(word(2), 0x000, "line {h}");
        assert_eq!(word(3), 0x000, "line {h}");
        assert_eq!(word(4), 0x000, "line {h}");
        assert_eq!(word(5), 0x000, "line {h}");
        let fvh = word(6);
        assert!(
            [0x274, 0x2d8, 0x368, 0x3c4].contains(&fvh),
            "line {h} fvh {fvh:#x}"
        );
        assert_eq!(word(7), fvh, "line {h}");
    }
}

#[test]
fn test_hd_line_crc_of_blanking_frame() {
    // all active samples at blanking levels: U = V = 0x200, Y = 0x040
    let mut pic = make_picture(1920, 1080);
    for row in 0..1080 {
        pic.planes[0].row16_mut(row).fill(0x040);
        pic.planes[1].row16_mut(row).fill(0x200);
        pic.planes[2].row16_mut(row).fill(0x200);
    }

    let flow = planar10_flow(1920, 1080, Rational::new(25, 1));
    let encoded = encode_one(&flow, pic, None);
    let block = encoded.block().unwrap();

    let mut found = false;
    for h in 0..1125 {
        let base = h * 2640 * 4;
        let word = |i: usize| {
            u16::from_le_bytes([block[base + 2 * i], block[base + 2 * i + 1]])
        };
        if word(12) == 0x1e8 && word(13) == 0x204 {
            found = true;
        }
        // every CRC word carries bit 9 = !bit 8
        for i in 12..16 {
            let w = word(i);
            assert_eq!(((w >> 8) & 1) ^ ((w >> 9) & 1), 1, "line {h} word {i}");
        }
    }
    assert!(found, "expected the fixed blanking CRC pair (0x1e8, 0x204)");
}

#[test]
fn test_hd_encode_decode_roundtrip() {
    let flow = planar10_flow(1920, 1080, Rational::new(25, 1));
    let pic = make_picture(1920, 1080);
    let audio = make_audio(1920); // 48000 / 25

    let encoded = encode_one(&flow, pic.clone(), Some(&audio));

    let mut decoder = SdiDecoder::new(DecoderOutput::Planar10);
    decoder.set_input_format(&flow).unwrap();

    let mut out = Outputs::new();
    decoder.push_frame(encoded, &mut out).unwrap();

    let mut picture = None;
    let mut sound = None;
    let mut vanc = 0;
    for (port, unit) in out.drain() {
        if unit.flow_def.is_some() {
            continue;
        }
        match port {
            Port::Main => picture = Some(unit),
            Port::Audio => sound = Some(unit),
            Port::Vanc => vanc += 1,
            Port::Vbi => {}
        }
    }

    // the active picture survives bit-exactly
    let decoded = picture.expect("picture output");
    let decoded_pic = decoded.picture().unwrap();
    for plane in 0..3 {
        for row in 0..1080 {
            assert_eq!(
                decoded_pic.planes[plane].row16(row),
                pic.planes[plane].row16(row),
                "plane {plane} row {row}"
            );
        }
    }
    assert_eq!(vanc, 1);

    // embedded audio survives sample for sample at 24 bits
    let decoded_audio = sound.expect("audio output");
    let decoded_sound = decoded_audio.sound().unwrap();
    assert_eq!(decoded_sound.frame_count(), 1920);
    assert_eq!(decoded_sound.channels, 16);
    for (i, (got, want)) in decoded_sound
        .samples
        .iter()
        .zip(audio.samples.iter())
        .enumerate()
    {
        assert_eq!(got, want, "audio sample {i}");
    }
}

#[test]
fn test_pal_encode_decode_roundtrip() {
    let flow = planar10_flow(720, 576, Rational::new(25, 1));
    let pic = make_picture(720, 576);

    // SD embeds 20-bit audio
    let mut audio = make_audio(1920);
    for s in audio.samples.iter_mut() {
        *s = (*s / 256) * 4096;
    }

    let encoded = encode_one(&flow, pic.clone(), Some(&audio));
    assert_eq!(encoded.block().unwrap().len(), 625 * 864 * 4);

    let mut decoder = SdiDecoder::new(DecoderOutput::Planar10);
    decoder.set_input_format(&flow).unwrap();

    let mut out = Outputs::new();
    decoder.push_frame(encoded, &mut out).unwrap();

    let mut picture = None;
    let mut sound = None;
    for (port, unit) in out.drain() {
        if unit.flow_def.is_some() {
            continue;
        }
        match port {
            Port::Main => picture = Some(unit),
            Port::Audio => sound = Some(unit),
            _ => {}
        }
    }

    let decoded = picture.expect("picture output");
    let decoded_pic = decoded.picture().unwrap();
    for plane in 0..3 {
        for row in 0..576 {
            assert_eq!(
                decoded_pic.planes[plane].row16(row),
                pic.planes[plane].row16(row),
                "plane {plane} row {row}"
            );
        }
    }

    let decoded_audio = sound.expect("audio output");
    let decoded_sound = decoded_audio.sound().unwrap();
    assert_eq!(decoded_sound.frame_count(), 1920);
    for (i, (got, want)) in decoded_sound
        .samples
        .iter()
        .zip(audio.samples.iter())
        .enumerate()
    {
        assert_eq!(got, want, "audio sample {i}");
    }
}
