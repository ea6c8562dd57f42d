//! GPS L1 C/A signal generation.
//!
//! Everything needed to synthesize the baseband I/Q stream of a GPS
//! constellation in real time: GPS time handling, the broadcast
//! ephemeris and almanac stores, C/A code and navigation message
//! assembly, the per-satellite channel engine and the scheduler that
//! couples them to a sample buffer pool.

pub mod almanac;
pub mod channel;
pub mod code;
pub mod datetime;
pub mod ephemeris;
mod error;
pub mod generator;
pub mod io;
pub mod ionoutc;
pub mod range;
pub mod subframe;

pub use almanac::{Almanac, AlmanacSv};
pub use channel::Channel;
pub use datetime::{DateTime, GpsTime};
pub use ephemeris::Ephemeris;
pub use error::Error;
pub use generator::{
    builder::SignalGeneratorBuilder,
    signal_generator::{SignalGenerator, Target},
    utils::MotionMode,
};
pub use io::DataFormat;
pub use ionoutc::IonoUtc;
pub use range::{Range, check_sat_visibility, compute_range};
