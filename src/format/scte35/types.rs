//! SCTE-35 event and descriptor model.

/// Splice command types carried in a section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpliceCommand {
    /// splice_null()
    Null,
    /// splice_insert()
    Insert,
    /// time_signal()
    TimeSignal,
}

impl SpliceCommand {
    /// Wire value of the command type field
    pub fn code(&self) -> u8 {
        match self {
            SpliceCommand::Null => 0x00,
            SpliceCommand::Insert => 0x05,
            SpliceCommand::TimeSignal => 0x06,
        }
    }

    /// Parses a wire command type
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(SpliceCommand::Null),
            0x05 => Some(SpliceCommand::Insert),
            0x06 => Some(SpliceCommand::TimeSignal),
            _ => None,
        }
    }
}

/// Identifier of all SCTE-35 splice descriptors ("CUEI")
pub const SPLICE_DESC_IDENTIFIER: u32 = 0x43554549;

/// Tag of the segmentation descriptor
pub const SPLICE_DESC_TAG_SEG: u8 = 0x02;

/// A segmentation descriptor (tag 0x02)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationDescriptor {
    /// Segmentation event id
    pub event_id: u32,
    /// Event cancel indicator
    pub cancel: bool,
    /// Delivery-not-restricted flag
    pub delivery_not_restricted: bool,
    /// 40-bit segmentation duration with its auto-return semantics
    pub duration: Option<u64>,
    /// Segmentation upid type
    pub upid_type: u8,
    /// Raw upid bytes
    pub upid: Vec<u8>,
    /// Segmentation type id
    pub type_id: u8,
    /// Segment number
    pub num: u8,
    /// Expected segment count
    pub expected: u8,
    /// Sub-segment number (type 0x34/0x36/0x38/0x3a only)
    pub sub_num: Option<u8>,
    /// Expected sub-segment count
    pub sub_expected: Option<u8>,
}

impl SegmentationDescriptor {
    /// Serializes the descriptor including its tag and length
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body: Vec<u8> = Vec::with_capacity(32);
        body.extend_from_slice(&SPLICE_DESC_IDENTIFIER.to_be_bytes());
        body.extend_from_slice(&self.event_id.to_be_bytes());
        body.push(if self.cancel { 0xff } else { 0x7f });
        if !self.cancel {
            // program_segmentation = 1, duration flag, delivery flag
            let mut flags = 0x80u8 | 0x1f;
            if self.duration.is_some() {
                flags |= 0x40;
            }
            if self.delivery_not_restricted {
                flags |= 0x20;
            }
            body.push(flags);
            if let Some(duration) = self.duration {
                let d = duration & 0xff_ffff_ffff;
                body.push((d >> 32) as u8);
                body.extend_from_slice(&((d & 0xffff_ffff) as u32).to_be_bytes());
            }
            body.push(self.upid_type);
            body.push(self.upid.len() as u8);
            body.extend_from_slice(&self.upid);
            body.push(self.type_id);
            body.push(self.num);
            body.push(self.expected);
            if let (Some(sub_num), Some(sub_expected)) = (self.sub_num, self.sub_expected) {
                body.push(sub_num);
                body.push(sub_expected);
            }
        }

        let mut bytes = Vec::with_capacity(body.len() + 2);
        bytes.push(SPLICE_DESC_TAG_SEG);
        bytes.push(body.len() as u8);
        bytes.extend_from_slice(&body);
        bytes
    }

    /// Reads the event id out of a serialized splice descriptor; returns
    /// `None` unless it is a CUEI segmentation descriptor
    pub fn event_id_of(bytes: &[u8]) -> Option<u32> {
        if bytes.len() < 11 || bytes[0] != SPLICE_DESC_TAG_SEG {
            return None;
        }
        let identifier = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        if identifier != SPLICE_DESC_IDENTIFIER {
            return None;
        }
        Some(u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]))
    }
}

/// One live SCTE-35 event as tracked by the merge stage.
///
/// At most one live event exists per `(command type, id)`; time-signal
/// events are keyed by their original PTS instead of an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scte35Event {
    /// Command type
    pub command: SpliceCommand,
    /// Splice event id (splice insert)
    pub event_id: u32,
    /// Event cancel indicator
    pub cancel: bool,
    /// Out-of-network indicator
    pub out_of_network: bool,
    /// Auto-return flag of the break duration
    pub auto_return: bool,
    /// Unique program id
    pub program_id: u16,
    /// Program PTS of the splice point (27 MHz)
    pub pts_prog: Option<u64>,
    /// Original PTS as received (27 MHz)
    pub pts_orig: Option<u64>,
    /// System time of the splice point (27 MHz)
    pub pts_sys: Option<u64>,
    /// Break duration (27 MHz)
    pub duration: Option<u64>,
    /// Serialized splice descriptors
    pub descriptors: Vec<Vec<u8>>,
}

impl Scte35Event {
    /// Creates a splice-null event
    pub fn null() -> Self {
        Self {
            command: SpliceCommand::Null,
            event_id: 0,
            cancel: false,
            out_of_network: false,
            auto_return: false,
            program_id: 0,
            pts_prog: None,
            pts_orig: None,
            pts_sys: None,
            duration: None,
            descriptors: Vec::new(),
        }
    }

    /// Creates a splice-insert event
    pub fn insert(event_id: u32) -> Self {
        Self {
            command: SpliceCommand::Insert,
            ..Self::null()
        }
        .with_event_id(event_id)
    }

    /// Creates a time-signal event
    pub fn time_signal(pts_orig: u64) -> Self {
        let mut event = Self::null();
        event.command = SpliceCommand::TimeSignal;
        event.pts_orig = Some(pts_orig);
        event.pts_prog = Some(pts_orig);
        event
    }

    /// Sets the event id
    pub fn with_event_id(mut self, event_id: u32) -> Self {
        self.event_id = event_id;
        self
    }

    /// Returns true when the fields the generator serializes differ
    pub fn splice_fields_differ(&self, other: &Self) -> bool {
        self.cancel != other.cancel
            || self.out_of_network != other.out_of_network
            || self.auto_return != other.auto_return
            || self.program_id != other.program_id
            || self.duration != other.duration
            || self.pts_prog != other.pts_prog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(SpliceCommand::Null.code(), 0x00);
        assert_eq!(SpliceCommand::Insert.code(), 0x05);
        assert_eq!(SpliceCommand::TimeSignal.code(), 0x06);
        assert_eq!(SpliceCommand::from_code(0x05), Some(SpliceCommand::Insert));
        assert_eq!(SpliceCommand::from_code(0x07), None);
    }

    #[test]
    fn test_segmentation_descriptor_event_id() {
        let desc = SegmentationDescriptor {
            event_id: 0x0102_0304,
            cancel: false,
            delivery_not_restricted: true,
            duration: Some(90_000 * 30),
            upid_type: 0x0c,
            upid: b"ad-break".to_vec(),
            type_id: 0x30,
            num: 1,
            expected: 1,
            sub_num: None,
            sub_expected: None,
        };
        let bytes = desc.to_bytes();
        assert_eq!(bytes[0], SPLICE_DESC_TAG_SEG);
        assert_eq!(usize::from(bytes[1]), bytes.len() - 2);
        assert_eq!(SegmentationDescriptor::event_id_of(&bytes), Some(0x0102_0304));

        // not a segmentation descriptor
        assert_eq!(SegmentationDescriptor::event_id_of(&[0x01, 0x02]), None);
    }
}
