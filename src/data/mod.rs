//! Data structures for discovered devices.

pub mod device;

pub use device::DeviceRecord;
