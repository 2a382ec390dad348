//! Infrastructure layer for the client application.
//!
//! Contains the OS- and network-facing adapters.
//!
//! **Dependency rule**: this layer may depend on `application` and `rcpc_core`,
//! but MUST NOT be imported by the `application` use cases except through the
//! listener and event types they observe.
//!
//! # Sub-modules
//!
//! - **`network`** – Transport connector and session: TCP + TLS connect, the
//!   identity handshake, and the reader/writer loops.
//!
//! - **`notifier`** – Publish/subscribe fan-out of network events to any number
//!   of listeners.
//!
//! - **`storage`** – TOML configuration and the persisted device identifier.
//!
//! - **`tls`** – Secure session factory built from PEM credential material.

pub mod network;
pub mod notifier;
pub mod storage;
pub mod tls;
