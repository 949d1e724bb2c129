//! Engine error taxonomy.
//!
//! Registry and resolver failures surface to the caller of `play()`/`resolve()` and drive the
//! transport into `error`; nothing here is retried automatically.

use std::time::Duration;

use media_engine_types::{Ability, CommandKind, ErrorInfo, ErrorKind, Provenance, TransportState};

use crate::plugin::PluginStatus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A (provenance, ability) pair is already claimed by an enabled plugin.
    #[error("plugin {plugin} cannot claim {provenance}/{ability}: already claimed by {existing}")]
    Conflict {
        plugin: String,
        existing: String,
        provenance: Provenance,
        ability: Ability,
    },

    /// A live plugin with the same id is already registered.
    #[error("plugin {0} is already registered")]
    AlreadyRegistered(String),

    #[error("unknown plugin {0}")]
    UnknownPlugin(String),

    /// The requested lifecycle change is not allowed from the plugin's current status.
    #[error("plugin {plugin} is {status}")]
    InvalidLifecycle { plugin: String, status: PluginStatus },

    /// No enabled plugin offers the ability for the provenance.
    #[error("no enabled plugin offers {ability} for {provenance}")]
    NotFound {
        provenance: Provenance,
        ability: Ability,
    },

    /// The plugin was disabled or disposed while in use, or failed to initialize.
    #[error("plugin {0} is unavailable")]
    PluginUnavailable(String),

    #[error("stream resolution timed out after {0:?}")]
    ResolutionTimeout(Duration),

    /// The plugin reported a failure or returned an unusable handle.
    #[error("plugin {plugin} failed to resolve: {message}")]
    ResolutionFailed { plugin: String, message: String },

    /// A newer request or a stop replaced this one before it settled.
    #[error("superseded by a newer request")]
    Superseded,

    /// Device or platform playback failure.
    #[error("sink error: {0}")]
    Sink(String),

    /// The command has no transition from the current state.
    #[error("{command} ignored in state {state}")]
    CommandIgnored {
        command: CommandKind,
        state: TransportState,
    },

    /// The player task has shut down.
    #[error("player is closed")]
    PlayerClosed,
}

impl EngineError {
    /// Category published on the event bus.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Conflict { .. } | EngineError::AlreadyRegistered(_) => ErrorKind::Conflict,
            EngineError::UnknownPlugin(_) | EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidLifecycle { .. } | EngineError::PluginUnavailable(_) => {
                ErrorKind::PluginUnavailable
            }
            EngineError::ResolutionTimeout(_) => ErrorKind::ResolutionTimeout,
            EngineError::ResolutionFailed { .. } => ErrorKind::ResolutionFailed,
            EngineError::Sink(_) => ErrorKind::Sink,
            EngineError::Superseded
            | EngineError::CommandIgnored { .. }
            | EngineError::PlayerClosed => ErrorKind::Other,
        }
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let conflict = EngineError::Conflict {
            plugin: "b".into(),
            existing: "a".into(),
            provenance: Provenance::remote("provider-A"),
            ability: Ability::ResolveStream,
        };
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert_eq!(
            conflict.to_string(),
            "plugin b cannot claim remote-provider-A/resolveStream: already claimed by a"
        );
        assert_eq!(
            EngineError::ResolutionTimeout(Duration::from_secs(5)).kind(),
            ErrorKind::ResolutionTimeout
        );
        assert_eq!(EngineError::Sink("device lost".into()).kind(), ErrorKind::Sink);
    }

    #[test]
    fn info_carries_message() {
        let err = EngineError::PluginUnavailable("yt".into());
        let info = err.info();
        assert_eq!(info.kind, ErrorKind::PluginUnavailable);
        assert_eq!(info.message, "plugin yt is unavailable");
    }
}
