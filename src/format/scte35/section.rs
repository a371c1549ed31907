//! SCTE-35 splice section encoding.
//!
//! Sections are whole PSI byte blocks: table id 0xFC, flat header,
//! splice command, descriptor loop and a CRC-32/MPEG-2 trailer. PTS and
//! duration values arrive in 27 MHz ticks and are stored as
//! `(value / 300) mod 2^33` (90 kHz, 33 bits).

use super::types::{Scte35Event, SpliceCommand};
use crate::utils::{BitReader, Crc32Mpeg2};
use crate::{Result, SdiError};
use bytes::{BufMut, BytesMut};

/// SCTE-35 table id
pub const TABLE_ID: u8 = 0xfc;

/// 2^33, the resolution of PTS fields
const POW2_33: u64 = 8_589_934_592;

/// Ratio between the 27 MHz pipeline clock and the 90 kHz MPEG clock
const CLOCK_SCALE: u64 = 300;

fn pts_33(ticks: u64) -> u64 {
    (ticks / CLOCK_SCALE) % POW2_33
}

fn put_splice_time(buf: &mut BytesMut, pts: Option<u64>) {
    match pts {
        Some(ticks) => {
            let pts = pts_33(ticks);
            buf.put_u8(0x80 | 0x7e | ((pts >> 32) as u8 & 1)); // time_specified
            buf.put_u32((pts & 0xffff_ffff) as u32);
        }
        None => buf.put_u8(0x7f),
    }
}

fn put_break_duration(buf: &mut BytesMut, duration: u64, auto_return: bool) {
    let d = pts_33(duration);
    let mut first = 0x7eu8; // reserved bits
    if auto_return {
        first |= 0x80;
    }
    buf.put_u8(first | ((d >> 32) as u8 & 1));
    buf.put_u32((d & 0xffff_ffff) as u32);
}

/// Builds one splice section for an event.
///
/// The returned block is a complete PSI section with a valid CRC; a
/// splice-null section comes out of [`Scte35Event::null`].
pub fn build_section(event: &Scte35Event) -> BytesMut {
    let mut command = BytesMut::with_capacity(64);
    match event.command {
        SpliceCommand::Null => {}
        SpliceCommand::TimeSignal => {
            put_splice_time(&mut command, event.pts_prog);
        }
        SpliceCommand::Insert => {
            command.put_u32(event.event_id);
            command.put_u8(if event.cancel { 0xff } else { 0x7f });
            if !event.cancel {
                let mut flags = 0x0fu8; // reserved
                if event.out_of_network {
                    flags |= 0x80;
                }
                flags |= 0x40; // program_splice
                if event.duration.is_some() {
                    flags |= 0x20;
                }
                if event.pts_prog.is_none() {
                    flags |= 0x10; // splice_immediate
                }
                command.put_u8(flags);

                if event.pts_prog.is_some() {
                    put_splice_time(&mut command, event.pts_prog);
                }
                if let Some(duration) = event.duration {
                    put_break_duration(&mut command, duration, event.auto_return);
                }
                command.put_u16(event.program_id);
                command.put_u8(0); // avail_num
                command.put_u8(0); // avails_expected
            }
        }
    }

    let mut descriptors = BytesMut::new();
    for desc in &event.descriptors {
        descriptors.put_slice(desc);
    }

    // table header through CRC
    let mut section = BytesMut::with_capacity(32 + command.len() + descriptors.len());
    section.put_u8(TABLE_ID);
    // section_syntax = 0, private = 0, sap = 3 (not specified)
    let section_length = 11 + command.len() + 2 + descriptors.len() + 4;
    section.put_u16(0x3000 | (section_length as u16 & 0x0fff));
    section.put_u8(0); // protocol_version
    // encrypted = 0, algorithm = 0, pts_adjustment = 0
    section.put_u8(0);
    section.put_u32(0);
    section.put_u8(0); // cw_index
    // tier = 0xfff, splice_command_length
    let tier_and_len = (0xfffu32 << 12) | (command.len() as u32 & 0xfff);
    section.put_u8((tier_and_len >> 16) as u8);
    section.put_u16((tier_and_len & 0xffff) as u16);
    section.put_u8(event.command.code());
    section.put_slice(&command);
    section.put_u16(descriptors.len() as u16);
    section.put_slice(&descriptors);

    let crc = Crc32Mpeg2::new().calculate(&section);
    section.put_u32(crc);
    section
}

/// Parses a splice section back into an event.
///
/// The inverse of [`build_section`], used when cue messages arrive as
/// whole PSI blocks from an upstream TS demux. Time fields come back in
/// 27 MHz ticks (the 33-bit wrap is not re-extended).
pub fn parse_section(data: &[u8]) -> Result<Scte35Event> {
    if data.len() < 20 || data[0] != TABLE_ID {
        return Err(SdiError::Parser("not an SCTE-35 section".into()));
    }
    if !check_section_crc(data) {
        return Err(SdiError::Parser("bad section CRC".into()));
    }

    let mut r = BitReader::new(&data[1..]);
    r.skip_bits(4)?; // section_syntax, private, sap
    let section_length = r.read_bits(12)? as usize;
    if section_length + 3 != data.len() {
        return Err(SdiError::Parser("section length mismatch".into()));
    }
    r.skip_bits(8)?; // protocol_version
    r.skip_bits(7)?; // encrypted_packet, encryption_algorithm
    let pts_adjustment =
        (u64::from(r.read_bits(1)?) << 32) | u64::from(r.read_bits(32)?);
    r.skip_bits(8)?; // cw_index
    r.skip_bits(12)?; // tier
    let command_length = r.read_bits(12)? as usize;
    let command_type = r.read_bits(8)? as u8;

    let command = SpliceCommand::from_code(command_type)
        .ok_or_else(|| SdiError::Parser(format!("unknown command {command_type:#x}")))?;

    let mut event = Scte35Event::null();
    event.command = command;

    let read_splice_time = |r: &mut BitReader| -> Result<Option<u64>> {
        let specified = r.read_bits(1)? == 1;
        if specified {
            r.skip_bits(6)?;
            let pts = (u64::from(r.read_bits(1)?) << 32) | u64::from(r.read_bits(32)?);
            Ok(Some((pts + pts_adjustment) * CLOCK_SCALE))
        } else {
            r.skip_bits(7)?;
            Ok(None)
        }
    };

    match command {
        SpliceCommand::Null => {}
        SpliceCommand::TimeSignal => {
            let pts = read_splice_time(&mut r)?;
            event.pts_prog = pts;
            event.pts_orig = pts;
        }
        SpliceCommand::Insert => {
            event.event_id = r.read_bits(32)?;
            event.cancel = r.read_bits(1)? == 1;
            r.skip_bits(7)?;
            if !event.cancel {
                event.out_of_network = r.read_bits(1)? == 1;
                let program_splice = r.read_bits(1)? == 1;
                let duration_flag = r.read_bits(1)? == 1;
                let splice_immediate = r.read_bits(1)? == 1;
                r.skip_bits(4)?;

                if program_splice && !splice_immediate {
                    let pts = read_splice_time(&mut r)?;
                    event.pts_prog = pts;
                    event.pts_orig = pts;
                }
                if duration_flag {
                    event.auto_return = r.read_bits(1)? == 1;
                    r.skip_bits(6)?;
                    let duration =
                        (u64::from(r.read_bits(1)?) << 32) | u64::from(r.read_bits(32)?);
                    event.duration = Some(duration * CLOCK_SCALE);
                }
                event.program_id = r.read_bits(16)? as u16;
                r.skip_bits(16)?; // avail_num, avails_expected
            }
        }
    }

    // descriptor loop sits between the command and the CRC
    let desc_loop_start = 14 + command_length;
    let desc_length =
        usize::from(u16::from_be_bytes([data[desc_loop_start], data[desc_loop_start + 1]]));
    let mut descriptors = &data[desc_loop_start + 2..desc_loop_start + 2 + desc_length];
    while descriptors.len() >= 2 {
        let len = 2 + usize::from(descriptors[1]);
        if len > descriptors.len() {
            return Err(SdiError::Parser("truncated splice descriptor".into()));
        }
        event.descriptors.push(descriptors[..len].to_vec());
        descriptors = &descriptors[len..];
    }

    Ok(event)
}

/// Validates the CRC trailer of a section
pub fn check_section_crc(section: &[u8]) -> bool {
    if section.len() < 4 {
        return false;
    }
    let (body, trailer) = section.split_at(section.len() - 4);
    let crc = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    Crc32Mpeg2::new().calculate(body) == crc
}

/// Reads the section length field and returns the total section size
pub fn section_size(section: &[u8]) -> Option<usize> {
    if section.len() < 3 {
        return None;
    }
    let length = usize::from(u16::from_be_bytes([section[1], section[2]]) & 0x0fff);
    Some(3 + length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::clock::UCLOCK_FREQ;

    #[test]
    fn test_null_section_shape() {
        let section = build_section(&Scte35Event::null());
        assert_eq!(section[0], TABLE_ID);
        assert_eq!(section_size(&section), Some(section.len()));
        assert!(check_section_crc(&section));
        // splice_command_type
        assert_eq!(section[13], 0x00);
        // fixed-size null section: header(14) + desc loop len(2) + crc(4)
        assert_eq!(section.len(), 20);
    }

    #[test]
    fn test_insert_section_times() {
        let mut event = Scte35Event::insert(42);
        event.out_of_network = true;
        event.auto_return = true;
        event.pts_prog = Some(10 * UCLOCK_FREQ);
        event.duration = Some(30 * UCLOCK_FREQ);
        event.program_id = 7;

        let section = build_section(&event);
        assert!(check_section_crc(&section));
        assert_eq!(section[13], 0x05);

        // event id right after the command type
        let id = u32::from_be_bytes([section[14], section[15], section[16], section[17]]);
        assert_eq!(id, 42);

        // splice time: 10 s at 90 kHz
        let pts = (u64::from(section[20] & 1) << 32)
            | u64::from(u32::from_be_bytes([
                section[21], section[22], section[23], section[24],
            ]));
        assert_eq!(pts, 900_000);

        // break duration: auto return + 30 s at 90 kHz
        assert_eq!(section[25] & 0x80, 0x80);
        let dur = (u64::from(section[25] & 1) << 32)
            | u64::from(u32::from_be_bytes([
                section[26], section[27], section[28], section[29],
            ]));
        assert_eq!(dur, 2_700_000);
    }

    #[test]
    fn test_parse_inverts_build() {
        let mut event = Scte35Event::insert(1234);
        event.out_of_network = true;
        event.auto_return = true;
        event.program_id = 9;
        event.pts_prog = Some(12 * UCLOCK_FREQ);
        event.duration = Some(30 * UCLOCK_FREQ);
        event.descriptors = vec![vec![0x02, 0x03, 0xaa, 0xbb, 0xcc]];

        let section = build_section(&event);
        let parsed = parse_section(&section).unwrap();

        assert_eq!(parsed.command, SpliceCommand::Insert);
        assert_eq!(parsed.event_id, 1234);
        assert!(parsed.out_of_network);
        assert!(parsed.auto_return);
        assert_eq!(parsed.program_id, 9);
        assert_eq!(parsed.pts_prog, Some(12 * UCLOCK_FREQ));
        assert_eq!(parsed.duration, Some(30 * UCLOCK_FREQ));
        assert_eq!(parsed.descriptors, event.descriptors);

        // a corrupted byte fails the CRC
        let mut bad = section.to_vec();
        bad[14] ^= 1;
        assert!(parse_section(&bad).is_err());
    }

    #[test]
    fn test_time_signal_section() {
        let event = Scte35Event::time_signal(2 * UCLOCK_FREQ);
        let section = build_section(&event);
        assert!(check_section_crc(&section));
        assert_eq!(section[13], 0x06);
        // time_specified set
        assert_eq!(section[14] & 0x80, 0x80);
    }
}
