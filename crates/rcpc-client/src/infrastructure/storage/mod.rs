//! Persistent client state: the TOML config file and the device identifier.

pub mod config;
pub mod device_id;

pub use config::{ClientConfig, ConfigError, NetworkSettings, TlsSettings};
pub use device_id::{DeviceIdentity, FileDeviceIdentity, FixedDeviceIdentity, StorageError};
