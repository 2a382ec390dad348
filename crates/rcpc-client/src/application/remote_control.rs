//! RemoteControlUseCase: turns touchpad, button, and media-key gestures into
//! envelopes for the host.
//!
//! This use case sits at the application layer and hands every envelope to
//! an [`EnvelopeSink`].  In the running client that sink is the
//! [`Connector`](crate::infrastructure::network::Connector), which silently
//! drops envelopes while no session is active.

use std::sync::Arc;

use rcpc_core::Envelope;

/// Destination for outbound envelopes.
#[cfg_attr(test, mockall::automock)]
pub trait EnvelopeSink: Send + Sync {
    /// Queues `envelope` for delivery.  Never blocks and never fails; an
    /// envelope that cannot be delivered is dropped.
    fn submit(&self, envelope: Envelope);
}

/// Touchpad button as laid out on screen, left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadButton {
    Left,
    Middle,
    Right,
}

/// The remote control use case.
pub struct RemoteControlUseCase {
    sink: Arc<dyn EnvelopeSink>,
    invert_buttons: bool,
}

impl RemoteControlUseCase {
    /// Creates a use case that submits to `sink`.
    ///
    /// With `invert_buttons` the left and right pad buttons swap meaning, for
    /// a left-handed layout.
    pub fn new(sink: Arc<dyn EnvelopeSink>, invert_buttons: bool) -> Self {
        Self {
            sink,
            invert_buttons,
        }
    }

    // ── Pointer ───────────────────────────────────────────────────────────────

    /// One-finger drag on the touchpad.
    pub fn pointer_move(&self, dx: f32, dy: f32) {
        self.sink.submit(Envelope::Move {
            distance_x: dx,
            distance_y: dy,
        });
    }

    /// Two-finger drag on the touchpad.  Only the dominant axis is kept, so a
    /// slightly diagonal swipe scrolls straight.
    pub fn scroll(&self, dx: f32, dy: f32) {
        let (distance_x, distance_y) = if dx.abs() > dy.abs() {
            (dx, 0.0)
        } else {
            (0.0, dy)
        };
        self.sink.submit(Envelope::Scroll {
            distance_x,
            distance_y,
        });
    }

    /// Drag on the dedicated vertical scroll strip.
    pub fn scroll_bar(&self, dy: f32) {
        self.sink.submit(Envelope::Scroll {
            distance_x: 0.0,
            distance_y: dy,
        });
    }

    pub fn primary_click(&self) {
        self.sink.submit(Envelope::PrimaryClick);
    }

    pub fn secondary_click(&self) {
        self.sink.submit(Envelope::SecondaryClick);
    }

    pub fn middle_click(&self) {
        self.sink.submit(Envelope::MiddleClick);
    }

    /// Press of an on-screen pad button, honouring the inverted layout.
    pub fn press(&self, button: PadButton) {
        match (button, self.invert_buttons) {
            (PadButton::Left, false) | (PadButton::Right, true) => self.primary_click(),
            (PadButton::Right, false) | (PadButton::Left, true) => self.secondary_click(),
            (PadButton::Middle, _) => self.middle_click(),
        }
    }

    pub fn drag_start(&self) {
        self.sink.submit(Envelope::DragStart);
    }

    pub fn drag_move(&self, dx: f32, dy: f32) {
        self.sink.submit(Envelope::DragMove {
            distance_x: dx,
            distance_y: dy,
        });
    }

    pub fn drag_end(&self) {
        self.sink.submit(Envelope::DragEnd);
    }

    // ── Media keys ────────────────────────────────────────────────────────────

    pub fn stop(&self) {
        self.sink.submit(Envelope::Stop);
    }

    pub fn play_pause(&self) {
        self.sink.submit(Envelope::PlayPause);
    }

    pub fn previous_track(&self) {
        self.sink.submit(Envelope::PreviousTrack);
    }

    pub fn next_track(&self) {
        self.sink.submit(Envelope::NextTrack);
    }

    /// Asks the host to report its volume; the answer arrives as an
    /// `INFO_CURRENT_VOLUME_UPDATE` envelope.
    pub fn request_volume(&self) {
        self.sink.submit(Envelope::GetVolume);
    }

    /// Sets the host volume from a slider value, clamped to `0..=100`.
    /// Non-finite input is ignored.
    pub fn set_volume(&self, percent: f32) {
        if !percent.is_finite() {
            return;
        }
        self.sink.submit(Envelope::SetVolume {
            volume: percent.clamp(0.0, 100.0),
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
