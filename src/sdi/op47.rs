//! Teletext insertion into 625-line VBI (OP-47 carriage).
//!
//! DVB teletext data units arriving on the subpicture input are replayed
//! as a WST waveform on the luma samples of PAL lines 9 (field 1) and
//! 572 (field 2): clock run-in, framing code, then the 42 payload bytes,
//! bits sent LSB first at the 444/1001 bit-per-sample ratio of the
//! 6.9375 Mbit teletext rate against 13.5 MHz luma sampling.

use bitvec::prelude::*;

/// DVB VBI data identifier that precedes the data units
pub const DVBVBI_DATA_IDENTIFIER: u8 = 0x10;
/// Data unit id for EBU teletext subtitles
pub const DVBVBI_ID_TTX_SUB: u8 = 0x03;
/// Data unit id for EBU teletext non-subtitles
pub const DVBVBI_ID_TTX_NONSUB: u8 = 0x02;
/// Payload length of a teletext data unit
pub const DVBVBI_LENGTH: usize = 0x2c;
/// Length of the data unit header (id + length)
pub const DVBVBI_UNIT_HEADER_SIZE: usize = 2;

/// Line of field 1 carrying teletext on 625-line rasters
pub const OP47_LINE_F1: u16 = 9;
/// Line of field 2 carrying teletext on 625-line rasters
pub const OP47_LINE_F2: u16 = 572;

/// Line offset added to field-2 line numbers in the DVB VBI mapping
pub const PAL_FIELD_OFFSET: u16 = 313;

/// Teletext high level on a 10-bit luma ramp
const TTX_HIGH: u16 = 0x2d0;
/// Teletext low level (black)
const TTX_LOW: u16 = 0x040;
/// Luma samples before the run-in starts
const TTX_START_OFFSET: usize = 16;

/// Extracts the field flag from a teletext data unit payload
/// (true = field 1 in the DVB coding)
pub fn unit_field(payload: &[u8]) -> bool {
    payload[0] & 0x20 != 0
}

/// Extracts the line offset from a teletext data unit payload
pub fn unit_line(payload: &[u8]) -> u8 {
    payload[0] & 0x1f
}

/// Encodes teletext data units into the luma samples of one VBI line.
///
/// `line_y` receives the waveform; `units` are the 43-byte data unit
/// payloads (framing code + 42 magazine/packet bytes). The sequence
/// counter increments per encoded line, as OP-47 requires.
pub fn encode_teletext_line(line_y: &mut [u16], units: &[&[u8]], sequence_counter: &mut u16) {
    for sample in line_y.iter_mut() {
        *sample = TTX_LOW;
    }

    // a 625-line VBI line carries one unit; extra units are dropped by
    // the caller's per-field limit
    let Some(unit) = units.first() else {
        return;
    };

    // clock run-in + framing code + the 42 magazine/packet bytes (the
    // unit's first two bytes are line address and framing code)
    let mut bits: BitVec<u8, Lsb0> = BitVec::with_capacity(45 * 8);
    bits.extend_from_bitslice([0x55u8, 0x55].view_bits::<Lsb0>());
    bits.extend_from_bitslice([0x27u8].view_bits::<Lsb0>());
    let payload = &unit[2.min(unit.len())..];
    for byte in payload {
        bits.extend_from_bitslice([*byte].view_bits::<Lsb0>());
    }

    for (i, sample) in line_y.iter_mut().enumerate().skip(TTX_START_OFFSET) {
        // 13.5 MHz sampling vs 6.9375 Mbit: 1000 bits per 1945 samples
        let bit_index = (i - TTX_START_OFFSET) * 1000 / 1945;
        if bit_index >= bits.len() {
            break;
        }
        if bits[bit_index] {
            *sample = TTX_HIGH;
        }
    }

    *sequence_counter = sequence_counter.wrapping_add(1);
}

/// Collects the teletext data units of a DVB VBI block, split per field.
///
/// Returns up to `max_per_field` unit payloads for each field; blocks not
/// starting with the VBI data identifier yield nothing.
pub fn collect_teletext_units<'a>(
    block: &'a [u8],
    max_per_field: usize,
) -> [Vec<&'a [u8]>; 2] {
    let mut fields: [Vec<&[u8]>; 2] = [Vec::new(), Vec::new()];

    if block.first() != Some(&DVBVBI_DATA_IDENTIFIER) {
        return fields;
    }

    let unit_size = DVBVBI_UNIT_HEADER_SIZE + DVBVBI_LENGTH;
    let mut rest = &block[1..];
    while rest.len() >= unit_size {
        let unit = &rest[..unit_size];
        rest = &rest[unit_size..];

        let data_unit_id = unit[0];
        let data_unit_len = usize::from(unit[1]);
        if data_unit_id != DVBVBI_ID_TTX_SUB && data_unit_id != DVBVBI_ID_TTX_NONSUB {
            continue;
        }
        if data_unit_len != DVBVBI_LENGTH {
            continue;
        }

        let payload = &unit[DVBVBI_UNIT_HEADER_SIZE..];
        let f2 = usize::from(!unit_field(payload));
        if f2 == 0 && unit_line(payload) == 0 {
            continue;
        }

        if fields[f2].len() < max_per_field {
            fields[f2].push(payload);
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(field1: bool, line: u8) -> Vec<u8> {
        let mut payload = vec![0u8; DVBVBI_LENGTH];
        payload[0] = (u8::from(field1) << 5) | (line & 0x1f);
        payload[1] = 0xe4; // framing code
        let mut unit = vec![DVBVBI_ID_TTX_SUB, DVBVBI_LENGTH as u8];
        unit.extend_from_slice(&payload);
        unit
    }

    #[test]
    fn test_collect_units_split_by_field() {
        let mut block = vec![DVBVBI_DATA_IDENTIFIER];
        block.extend_from_slice(&unit(true, 9));
        block.extend_from_slice(&unit(false, 9));
        block.extend_from_slice(&unit(true, 10));

        let fields = collect_teletext_units(&block, 5);
        assert_eq!(fields[0].len(), 2);
        assert_eq!(fields[1].len(), 1);

        // wrong identifier yields nothing
        let fields = collect_teletext_units(&block[1..], 5);
        assert!(fields[0].is_empty() && fields[1].is_empty());
    }

    #[test]
    fn test_waveform_levels_and_counter() {
        let u = unit(true, 9);
        let units = [&u[DVBVBI_UNIT_HEADER_SIZE..]];
        let mut line = vec![0u16; 720];
        let mut counter = 0u16;
        encode_teletext_line(&mut line, &units, &mut counter);
        assert_eq!(counter, 1);

        // leading samples stay at black, run-in toggles afterwards
        assert!(line[..TTX_START_OFFSET].iter().all(|&s| s == TTX_LOW));
        assert!(line.iter().any(|&s| s == TTX_HIGH));
        assert!(line.iter().all(|&s| s == TTX_LOW || s == TTX_HIGH));
    }
}
