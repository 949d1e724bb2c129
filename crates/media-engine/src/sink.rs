//! Device sink contract.
//!
//! The sink is the only component that touches an output device. The player drives it with
//! commands and receives callbacks through a [`SinkNotifier`] bound to one playback session;
//! callbacks from an older session are discarded by the player.

use anyhow::Result;
use tokio::sync::mpsc;

use media_engine_types::StreamHandle;

/// Playback output (audio element, device API, network renderer).
///
/// Calls arrive from the player task only, one at a time.
pub trait DeviceSink: Send {
    /// Prepare `stream` for playback. Callbacks for it go through `notifier`.
    fn load(&mut self, stream: &StreamHandle, notifier: SinkNotifier) -> Result<()>;

    /// Start or continue output. Returning `Ok` confirms that playback started.
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn seek(&mut self, position_ms: u64) -> Result<()>;

    /// Output level in `0.0..=1.0`, mute already applied.
    fn set_volume(&mut self, volume: f32) -> Result<()>;

    /// Playback speed multiplier in `0.5..=2.0`. Sinks without rate control keep normal speed.
    fn set_rate(&mut self, _rate: f32) -> Result<()> {
        Ok(())
    }

    /// Release the loaded stream.
    fn stop(&mut self) -> Result<()> {
        self.pause()
    }
}

/// Callback reported by a sink.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SinkEvent {
    Position(u64),
    Duration(u64),
    Buffering(bool),
    Ended,
    Error(String),
}

#[derive(Debug)]
pub(crate) struct SinkSignal {
    pub(crate) session: u64,
    pub(crate) event: SinkEvent,
}

/// Callback handle given to a sink on `load`. Cheap to clone and safe to call from any thread.
#[derive(Clone, Debug)]
pub struct SinkNotifier {
    session: u64,
    duration_hint: Option<u64>,
    tx: mpsc::UnboundedSender<SinkSignal>,
}

impl SinkNotifier {
    pub(crate) fn new(session: u64, tx: mpsc::UnboundedSender<SinkSignal>) -> Self {
        Self {
            session,
            duration_hint: None,
            tx,
        }
    }

    pub(crate) fn with_duration_hint(mut self, duration_ms: Option<u64>) -> Self {
        self.duration_hint = duration_ms;
        self
    }

    /// Playback session this notifier belongs to.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Track length the player already knows from the descriptor, if any.
    pub fn duration_hint(&self) -> Option<u64> {
        self.duration_hint
    }

    pub fn on_position_update(&self, elapsed_ms: u64) {
        self.send(SinkEvent::Position(elapsed_ms));
    }

    /// Duration discovered by the sink, overriding the descriptor's hint.
    pub fn on_duration(&self, duration_ms: u64) {
        self.send(SinkEvent::Duration(duration_ms));
    }

    pub fn on_buffering_changed(&self, buffering: bool) {
        self.send(SinkEvent::Buffering(buffering));
    }

    pub fn on_ended(&self) {
        self.send(SinkEvent::Ended);
    }

    pub fn on_error(&self, reason: impl Into<String>) {
        self.send(SinkEvent::Error(reason.into()));
    }

    /// Whether the player that issued this notifier is still running.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: SinkEvent) {
        // The player may already be gone; late callbacks are dropped.
        let _ = self.tx.send(SinkSignal {
            session: self.session,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifier_stamps_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = SinkNotifier::new(7, tx);

        notifier.on_position_update(1500);
        notifier.on_ended();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.session, 7);
        assert_eq!(first.event, SinkEvent::Position(1500));
        assert_eq!(rx.try_recv().unwrap().event, SinkEvent::Ended);
    }

    #[test]
    fn duration_hint_travels_with_clones() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let notifier = SinkNotifier::new(3, tx.clone()).with_duration_hint(Some(42_000));

        assert_eq!(notifier.clone().duration_hint(), Some(42_000));
        assert_eq!(SinkNotifier::new(4, tx).duration_hint(), None);
    }

    #[test]
    fn notifier_survives_closed_player() {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = SinkNotifier::new(1, tx);
        drop(rx);

        assert!(notifier.is_closed());
        notifier.on_error("device lost");
    }
}
