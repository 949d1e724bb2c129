//! Plugin-driven media playback engine.
//!
//! A [`registry::CapabilityRegistry`] routes `(provenance, ability)` requests to enabled
//! plugins. Each [`player::Player`] owns a resolver, a queue and a sink, and publishes every
//! observable change on its [`events::EventBus`].

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod player;
pub mod plugin;
pub mod plugins;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod sink;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::Catalog;
pub use config::EngineConfig;
pub use error::EngineError;
pub use events::{EventBus, EventReceiver, Subscription, SubscriptionId};
pub use player::{MAX_PLAYBACK_RATE, MIN_PLAYBACK_RATE, PlayOutcome, Player};
pub use plugin::{MediaPlugin, PluginManifest, PluginStatus};
pub use registry::{CapabilityRegistry, PluginInfo, PluginLease};
pub use sink::{DeviceSink, SinkNotifier};

pub use media_engine_types as types;
