//! Userspace NIC ring model.
//!
//! TX rings have exactly one writer (the sender) and one reader (the
//! NIC); RX rings the reverse. The [`NicPort`] trait stands in for the
//! kernel driver side: link state, ring synchronization and the
//! `tx_maxrate` rate hint. Tests drive [`MockNic`] instances.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Size of the zero-payload pad packets that hold the pacing rate
pub const PAD_PACKET_SIZE: usize = 1438;

/// Slot buffer size (one ethernet frame)
pub const SLOT_SIZE: usize = 2048;

/// One transmit slot
#[derive(Clone)]
pub struct TxSlot {
    /// Frame bytes
    pub buf: Box<[u8; SLOT_SIZE]>,
    /// Valid length of this slot
    pub len: usize,
}

impl Default for TxSlot {
    fn default() -> Self {
        Self {
            buf: Box::new([0; SLOT_SIZE]),
            len: 0,
        }
    }
}

/// Single-writer transmit ring
pub struct TxRing {
    slots: Vec<TxSlot>,
    cur: usize,
    tail: usize,
}

impl TxRing {
    /// Creates a ring of `num_slots` slots
    pub fn new(num_slots: usize) -> Self {
        Self {
            slots: (0..num_slots).map(|_| TxSlot::default()).collect(),
            cur: 0,
            tail: 0,
        }
    }

    /// Total slot count
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Slots filled but not yet transmitted
    pub fn pending(&self) -> usize {
        (self.cur + self.slots.len() - self.tail) % self.slots.len()
    }

    /// Free slots available to the writer
    pub fn space(&self) -> usize {
        self.slots.len() - 1 - self.pending()
    }

    /// The slot at the write position
    pub fn slot_mut(&mut self) -> &mut TxSlot {
        let cur = self.cur;
        &mut self.slots[cur]
    }

    /// Publishes the write position slot and moves to the next
    pub fn advance(&mut self) {
        self.cur = (self.cur + 1) % self.slots.len();
    }

    /// NIC side: takes up to `max` transmitted frames off the ring
    pub fn consume(&mut self, max: usize) -> Vec<Vec<u8>> {
        let mut taken = Vec::new();
        while self.tail != self.cur && taken.len() < max {
            let slot = &self.slots[self.tail];
            taken.push(slot.buf[..slot.len].to_vec());
            self.tail = (self.tail + 1) % self.slots.len();
        }
        taken
    }
}

/// Single-reader receive ring
#[derive(Default)]
pub struct RxRing {
    packets: VecDeque<Vec<u8>>,
}

impl RxRing {
    /// Creates an empty ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets waiting in the ring
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Returns true when no packets wait
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// The packet at the head of the ring, left in place
    pub fn peek(&self) -> Option<&[u8]> {
        self.packets.front().map(|p| p.as_slice())
    }

    /// Drops the head packet
    pub fn pop(&mut self) {
        self.packets.pop_front();
    }

    /// NIC side: appends a received frame
    pub fn push(&mut self, packet: Vec<u8>) {
        self.packets.push_back(packet);
    }
}

/// Driver-side operations of one NIC
pub trait NicPort: Send {
    /// Link state (the SIOCGIFFLAGS poll)
    fn is_up(&mut self) -> bool;

    /// Synchronizes a TX ring with the hardware (the NIOCTXSYNC ioctl):
    /// transmitted slots are reclaimed
    fn tx_sync(&mut self, ring: &mut TxRing);

    /// Synchronizes an RX ring with the hardware (the NIOCRXSYNC ioctl):
    /// arrived frames are appended
    fn rx_sync(&mut self, ring: &mut RxRing);

    /// Writes the `tx_maxrate` rate hint, in bits per second
    fn set_tx_maxrate(&mut self, bits_per_second: u64);
}

/// Shared handle controlling a [`MockNic`]'s link state
#[derive(Clone, Default)]
pub struct MockLink {
    up: Arc<AtomicBool>,
}

impl MockLink {
    /// Creates a link in the given state
    pub fn new(up: bool) -> Self {
        let link = Self::default();
        link.up.store(up, Ordering::SeqCst);
        link
    }

    /// Sets the link state
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    /// Reads the link state
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

/// In-memory NIC for tests: transmits into a capture buffer, receives
/// from a queue
pub struct MockNic {
    link: MockLink,
    /// Frames transmitted per tx_sync call
    pub tx_per_sync: usize,
    transmitted: Arc<Mutex<Vec<Vec<u8>>>>,
    to_receive: Arc<Mutex<VecDeque<Vec<u8>>>>,
    maxrate: Option<u64>,
}

impl MockNic {
    /// Creates a mock NIC with the given link handle
    pub fn new(link: MockLink) -> Self {
        Self {
            link,
            tx_per_sync: usize::MAX,
            transmitted: Arc::new(Mutex::new(Vec::new())),
            to_receive: Arc::new(Mutex::new(VecDeque::new())),
            maxrate: None,
        }
    }

    /// Shared view of the transmitted frames
    pub fn transmitted(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.transmitted)
    }

    /// Queues a frame for reception
    pub fn inject(&self, packet: Vec<u8>) {
        self.to_receive.lock().push_back(packet);
    }

    /// Shared handle to the reception queue
    pub fn rx_queue(&self) -> Arc<Mutex<VecDeque<Vec<u8>>>> {
        Arc::clone(&self.to_receive)
    }

    /// Last written tx_maxrate hint
    pub fn maxrate(&self) -> Option<u64> {
        self.maxrate
    }
}

impl NicPort for MockNic {
    fn is_up(&mut self) -> bool {
        self.link.is_up()
    }

    fn tx_sync(&mut self, ring: &mut TxRing) {
        let frames = ring.consume(self.tx_per_sync);
        self.transmitted.lock().extend(frames);
    }

    fn rx_sync(&mut self, ring: &mut RxRing) {
        let mut queue = self.to_receive.lock();
        while let Some(packet) = queue.pop_front() {
            ring.push(packet);
        }
    }

    fn set_tx_maxrate(&mut self, bits_per_second: u64) {
        self.maxrate = Some(bits_per_second);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_ring_accounting() {
        let mut ring = TxRing::new(8);
        assert_eq!(ring.space(), 7);

        for i in 0..3 {
            let slot = ring.slot_mut();
            slot.buf[0] = i;
            slot.len = 1;
            ring.advance();
        }
        assert_eq!(ring.pending(), 3);
        assert_eq!(ring.space(), 4);

        let taken = ring.consume(2);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0], vec![0]);
        assert_eq!(ring.pending(), 1);
    }

    #[test]
    fn test_mock_nic_sync() {
        let link = MockLink::new(true);
        let mut nic = MockNic::new(link.clone());
        let sent = nic.transmitted();

        let mut ring = TxRing::new(4);
        let slot = ring.slot_mut();
        slot.buf[..4].copy_from_slice(b"data");
        slot.len = 4;
        ring.advance();

        nic.tx_sync(&mut ring);
        assert_eq!(sent.lock().len(), 1);
        assert_eq!(ring.pending(), 0);

        link.set_up(false);
        assert!(!nic.is_up());
    }
}
