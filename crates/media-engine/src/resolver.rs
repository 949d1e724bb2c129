//! Source resolution: descriptor → stream handle.
//!
//! Each request runs the plugin call on its own task. The caller stops waiting when the
//! request is superseded, times out, or the plugin is disabled; the plugin's I/O is left to
//! finish on its own and its result is dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use media_engine_types::{Ability, SharedDescriptor, StreamHandle};

use crate::error::EngineError;
use crate::registry::{CapabilityRegistry, PluginLease};

/// Default bound on how long a resolution may take.
pub const DEFAULT_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves descriptors for one player. A new request cancels the previous one.
pub struct SourceResolver {
    registry: Arc<CapabilityRegistry>,
    timeout: Duration,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl SourceResolver {
    pub fn new(registry: Arc<CapabilityRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            in_flight: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Start resolving `descriptor`, cancelling any request still in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn resolve(&self, descriptor: SharedDescriptor) -> Resolution {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let lease = match self
            .registry
            .find_for_resolution(descriptor.provenance(), Ability::ResolveStream)
        {
            Ok(lease) => lease,
            Err(err) => {
                tracing::warn!(track = %descriptor.id(), error = %err, "no resolver for track");
                return Resolution {
                    descriptor,
                    inner: Pending::Failed(err),
                };
            }
        };

        tracing::debug!(
            track = %descriptor.id(),
            plugin = %lease.plugin_id(),
            "resolving stream"
        );
        let plugin = lease.plugin().clone();
        let target = descriptor.clone();
        let task = tokio::spawn(async move { plugin.resolve_stream(&target).await });

        Resolution {
            descriptor,
            inner: Pending::Running(PluginCall {
                lease,
                token,
                deadline: Instant::now() + self.timeout,
                timeout: self.timeout,
                task,
            }),
        }
    }

    /// Cancel the in-flight request, if any. Its result will be discarded.
    pub fn cancel_pending(&self) {
        if let Some(token) = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

/// A started resolution request.
pub struct Resolution {
    descriptor: SharedDescriptor,
    inner: Pending,
}

enum Pending {
    Failed(EngineError),
    Running(PluginCall<StreamHandle>),
}

impl Resolution {
    /// Wait for the request to settle.
    pub async fn outcome(self) -> Result<StreamHandle, EngineError> {
        let call = match self.inner {
            Pending::Failed(err) => return Err(err),
            Pending::Running(call) => call,
        };
        let plugin_id = call.lease.plugin_id().to_string();
        let handle = call.finish().await?;
        if handle.is_expired() {
            return Err(EngineError::ResolutionFailed {
                plugin: plugin_id,
                message: "stream handle already expired".to_string(),
            });
        }
        tracing::debug!(
            track = %self.descriptor.id(),
            plugin = %plugin_id,
            source = %handle.source,
            "stream resolved"
        );
        Ok(handle)
    }
}

/// A plugin operation running on its own task, bounded by a deadline, a cancellation token and
/// the plugin's lease.
pub(crate) struct PluginCall<T> {
    pub(crate) lease: PluginLease,
    pub(crate) token: CancellationToken,
    pub(crate) deadline: Instant,
    pub(crate) timeout: Duration,
    pub(crate) task: JoinHandle<anyhow::Result<T>>,
}

impl<T> PluginCall<T> {
    pub(crate) async fn finish(self) -> Result<T, EngineError> {
        let PluginCall {
            lease,
            token,
            deadline,
            timeout,
            mut task,
        } = self;
        let plugin_id = lease.plugin_id().to_string();

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(EngineError::Superseded),
            _ = lease.revoked() => Err(EngineError::PluginUnavailable(plugin_id.clone())),
            joined = &mut task => match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(EngineError::ResolutionFailed {
                    plugin: plugin_id.clone(),
                    message: format!("{err:#}"),
                }),
                Err(join_err) => Err(EngineError::ResolutionFailed {
                    plugin: plugin_id.clone(),
                    message: join_err.to_string(),
                }),
            },
            _ = tokio::time::sleep_until(deadline) => Err(EngineError::ResolutionTimeout(timeout)),
        };

        if outcome.is_err() && !task.is_finished() {
            tracing::debug!(plugin = %plugin_id, "abandoning plugin call; late result will be dropped");
        }
        outcome
    }
}
