//! # Redundant Network Plane
//!
//! The two-NIC send and receive paths of the pipeline:
//!
//! - [`sender`]: paced dual-ring transmission with pad-packet rate
//!   holding and DOWN→UP ring resynchronization
//! - [`receiver`]: dual-ring merge by RTP sequence number (1+1
//!   protection)
//! - [`ring`]: the userspace ring and NIC driver seam
//! - [`headers`]: raw ethernet/IPv4/UDP templates
//! - [`pump`]: the tokio pacing task driving the sender
//! - [`udp`]: plain socket transport for ringless deployments
//!
//! Each ring has exactly one writer or one reader; the NIC driver is the
//! counterpart.

/// Ethernet/IP/UDP header templates
pub mod headers;

/// NIC rings and the driver seam
pub mod ring;

/// Redundant sender
pub mod sender;

/// Redundant receiver
pub mod receiver;

/// Pacing pump
pub mod pump;

/// Socket transport
pub mod udp;

pub use receiver::{ReceiverMode, RedundantReceiver};
pub use ring::{MockLink, MockNic, NicPort, RxRing, TxRing};
pub use sender::{RedundantSender, SenderMode, FIXED_PRE_ROLL};
