//! Tracks the host's master volume as last reported by the host.

use std::sync::Mutex;

use rcpc_core::Envelope;

use crate::infrastructure::network::{EventKind, NetworkEvent};
use crate::infrastructure::notifier::NetworkEventListener;

/// Listener that remembers the most recent `INFO_CURRENT_VOLUME_UPDATE`.
///
/// The host reports volume as a fraction; the tracker stores it on the
/// same `0..=100` scale the volume slider uses.
#[derive(Debug, Default)]
pub struct VolumeTracker {
    percent: Mutex<Option<f32>>,
}

impl VolumeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last reported volume in percent, if the host has reported one.
    pub fn latest(&self) -> Option<f32> {
        *self.percent.lock().expect("lock poisoned")
    }
}

impl NetworkEventListener for VolumeTracker {
    fn on_event(&self, event: &NetworkEvent) {
        if let EventKind::MessageReceived(Envelope::VolumeUpdate { volume }) = &event.kind {
            if volume.is_finite() {
                let percent = (*volume * 100.0).clamp(0.0, 100.0) as f32;
                *self.percent.lock().expect("lock poisoned") = Some(percent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::AttemptId;

    fn received(envelope: Envelope) -> NetworkEvent {
        NetworkEvent::new(AttemptId(1), EventKind::MessageReceived(envelope))
    }

    #[test]
    fn test_no_update_means_unknown() {
        assert_eq!(VolumeTracker::new().latest(), None);
    }

    #[test]
    fn test_update_is_scaled_to_percent() {
        // Arrange
        let tracker = VolumeTracker::new();

        // Act
        tracker.on_event(&received(Envelope::VolumeUpdate { volume: 0.42 }));

        // Assert
        let percent = tracker.latest().unwrap();
        assert!((percent - 42.0).abs() < 1e-3, "got {percent}");
    }

    #[test]
    fn test_latest_update_wins_and_other_events_are_ignored() {
        let tracker = VolumeTracker::new();

        tracker.on_event(&received(Envelope::VolumeUpdate { volume: 0.1 }));
        tracker.on_event(&received(Envelope::VolumeUpdate { volume: 1.0 }));
        tracker.on_event(&received(Envelope::PlayPause));
        tracker.on_event(&NetworkEvent::new(AttemptId(1), EventKind::Disconnected));

        assert_eq!(tracker.latest(), Some(100.0));
    }

    #[test]
    fn test_out_of_range_report_is_clamped() {
        let tracker = VolumeTracker::new();
        tracker.on_event(&received(Envelope::VolumeUpdate { volume: 1.7 }));
        assert_eq!(tracker.latest(), Some(100.0));
    }
}
