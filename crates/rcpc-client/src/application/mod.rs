//! Application layer use cases for the client application.
//!
//! - **`remote_control`** – Turns touchpad, button, and media-key gestures
//!   into protocol envelopes and submits them through an `EnvelopeSink`.
//!
//! - **`volume`** – Listens for the host's volume reports so a slider can
//!   show the current level.

pub mod remote_control;
pub mod volume;
