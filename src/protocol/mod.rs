//! Protocol module for decoding notification payloads.
//!
//! Currently covers the Heart Rate Measurement characteristic.

pub mod heart_rate;

pub use heart_rate::{decode, HeartRateMeasurement, ValueFormat};
