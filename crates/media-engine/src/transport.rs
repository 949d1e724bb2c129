//! Transport state machine.
//!
//! `next_state` is the complete transition table. Anything it does not list is rejected, and
//! the player reports the rejection as `commandIgnored` instead of changing state.

use media_engine_types::{CommandKind, TransportState};

/// Input to the transport state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// A new track was requested (play, next, previous, skip).
    Play,
    /// Resolution succeeded and the sink confirmed start.
    Started,
    ResolveFailed,
    Pause,
    Resume,
    /// Resume found the stream expired and must resolve again.
    Reload,
    Underrun,
    Recovered,
    TrackEnded,
    /// Ended with a queue successor.
    Advance,
    /// Ended without a queue successor.
    Exhausted,
    Retry,
    SinkFailed,
    Stop,
}

impl Trigger {
    /// Command reported when this trigger is rejected.
    pub fn command(self) -> Option<CommandKind> {
        match self {
            Trigger::Play => Some(CommandKind::Play),
            Trigger::Pause => Some(CommandKind::Pause),
            Trigger::Resume | Trigger::Reload => Some(CommandKind::Resume),
            Trigger::Retry => Some(CommandKind::Retry),
            Trigger::Stop => Some(CommandKind::Stop),
            _ => None,
        }
    }
}

pub fn next_state(state: TransportState, trigger: Trigger) -> Option<TransportState> {
    use TransportState::*;

    let next = match (state, trigger) {
        (_, Trigger::Stop) => Idle,
        (_, Trigger::Play) => Loading,
        (Loading, Trigger::Started) => Playing,
        (Loading, Trigger::ResolveFailed) => Error,
        (Playing, Trigger::Pause) => Paused,
        (Paused, Trigger::Resume) => Playing,
        (Paused, Trigger::Reload) => Loading,
        (Playing, Trigger::Underrun) => Buffering,
        (Buffering, Trigger::Recovered) => Playing,
        (Playing, Trigger::TrackEnded) => Ended,
        (Ended, Trigger::Advance) => Loading,
        (Ended, Trigger::Exhausted) => Idle,
        (Error, Trigger::Retry) => Loading,
        (Loading | Playing | Paused | Buffering, Trigger::SinkFailed) => Error,
        _ => return None,
    };
    Some(next)
}

/// Current transport state with checked transitions.
#[derive(Debug, Default)]
pub struct TransportMachine {
    state: TransportState,
}

impl TransportMachine {
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Apply `trigger`; returns `(previous, next)` when the transition exists.
    pub fn fire(&mut self, trigger: Trigger) -> Option<(TransportState, TransportState)> {
        let previous = self.state;
        let next = next_state(previous, trigger)?;
        self.state = next;
        Some((previous, next))
    }

    pub fn allows(&self, trigger: Trigger) -> bool {
        next_state(self.state, trigger).is_some()
    }
}
