//! # SCTE-35 Subsystem
//!
//! Digital Program Insertion cueing: the merge stage deduplicates and
//! tracks event lifecycle against the system clock, the generator emits
//! splice sections at a configured interval, and the probe fans merged
//! observations out to observers.
//!
//! ## Example: splice insert lifecycle
//!
//! ```rust
//! use sdikit::format::scte35::{Scte35Event, Scte35Probe, ProbeEvent};
//! use sdikit::av::clock::UCLOCK_FREQ;
//!
//! let mut probe = Scte35Probe::new();
//!
//! let mut event = Scte35Event::insert(42);
//! event.pts_sys = Some(100 * UCLOCK_FREQ);
//! probe.input(event, 0);
//!
//! // the splice point fires when the clock passes it
//! let fired = probe.tick(101 * UCLOCK_FREQ);
//! assert!(matches!(fired.as_slice(), [ProbeEvent::Event(_)]));
//! ```

/// Event and descriptor model
pub mod types;

/// Splice section encoding
pub mod section;

/// Merge stage (dedup + lifecycle)
pub mod merge;

/// Section generator
pub mod generator;

/// Probe stage (observation fan-out)
pub mod probe;

pub use generator::{Scte35Generator, SECTION_FLOW_DEF};
pub use merge::{Observation, Scte35Merge};
pub use probe::{ProbeEvent, Scte35Probe};
pub use section::{build_section, parse_section};
pub use types::{Scte35Event, SegmentationDescriptor, SpliceCommand};
