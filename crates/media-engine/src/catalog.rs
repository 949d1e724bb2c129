//! Search and lyrics lookups routed through the capability registry.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use media_engine_types::{Ability, Lyrics, Provenance, SharedDescriptor, SourceDescriptor};

use crate::error::EngineError;
use crate::plugin::PluginStatus;
use crate::registry::{CapabilityRegistry, PluginLease};
use crate::resolver::PluginCall;

pub struct Catalog {
    registry: Arc<CapabilityRegistry>,
    timeout: Duration,
}

impl Catalog {
    pub fn new(registry: Arc<CapabilityRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Search the plugin that claims `provenance`.
    pub async fn search(
        &self,
        provenance: &Provenance,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SharedDescriptor>, EngineError> {
        let lease = self.registry.find_for_resolution(provenance, Ability::Search)?;
        let plugin = lease.plugin().clone();
        let owned = query.to_string();
        let task = tokio::spawn(async move { plugin.search(&owned, limit).await });
        let found = self.call(lease, task).await?;
        Ok(found
            .into_iter()
            .take(limit)
            .map(SourceDescriptor::shared)
            .collect())
    }

    /// Search every provenance with an enabled search plugin, in provenance order.
    ///
    /// A failing provider does not hide the results of the others.
    pub async fn search_all(
        &self,
        query: &str,
        limit: usize,
    ) -> Vec<(Provenance, Result<Vec<SharedDescriptor>, EngineError>)> {
        let provenances: BTreeSet<Provenance> = self
            .registry
            .plugins()
            .into_iter()
            .filter(|info| {
                info.status == PluginStatus::Enabled
                    && info.manifest.abilities.contains(&Ability::Search)
            })
            .flat_map(|info| info.manifest.provenances)
            .collect();

        let mut results = Vec::with_capacity(provenances.len());
        for provenance in provenances {
            let outcome = self.search(&provenance, query, limit).await;
            if let Err(err) = &outcome {
                tracing::warn!(%provenance, error = %err, "search failed");
            }
            results.push((provenance, outcome));
        }
        results
    }

    /// Lyrics for `descriptor` from the plugin that claims its provenance.
    pub async fn lyrics(&self, descriptor: &SharedDescriptor) -> Result<Option<Lyrics>, EngineError> {
        let lease = self
            .registry
            .find_for_resolution(descriptor.provenance(), Ability::Lyrics)?;
        let plugin = lease.plugin().clone();
        let target = descriptor.clone();
        let task = tokio::spawn(async move { plugin.lyrics(&target).await });
        self.call(lease, task).await
    }

    async fn call<T>(
        &self,
        lease: PluginLease,
        task: JoinHandle<anyhow::Result<T>>,
    ) -> Result<T, EngineError> {
        PluginCall {
            lease,
            token: CancellationToken::new(),
            deadline: Instant::now() + self.timeout,
            timeout: self.timeout,
            task,
        }
        .finish()
        .await
    }
}
