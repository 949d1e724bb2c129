//! Capability registry (plugin manager).
//!
//! Owns plugin registrations and routes requests to the single enabled plugin claiming a
//! `(provenance, ability)` key. Lifecycle changes are serialized against each other and
//! publish a new committed snapshot; lookups read the last committed snapshot and never
//! wait on a pending change.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use media_engine_types::{Ability, Provenance};

use crate::error::EngineError;
use crate::plugin::{MediaPlugin, PluginManifest, PluginStatus};

type ClaimKey = (Provenance, Ability);

#[derive(Clone)]
struct Registration {
    plugin: Arc<dyn MediaPlugin>,
    status: PluginStatus,
    /// Cancelled when the plugin stops being enabled.
    liveness: CancellationToken,
}

#[derive(Clone, Default)]
struct Committed {
    registrations: HashMap<String, Registration>,
    claims: HashMap<ClaimKey, String>,
}

impl Committed {
    fn registration(&self, plugin_id: &str) -> Result<&Registration, EngineError> {
        self.registrations
            .get(plugin_id)
            .ok_or_else(|| EngineError::UnknownPlugin(plugin_id.to_string()))
    }

    fn first_conflict(&self, manifest: &PluginManifest) -> Option<EngineError> {
        manifest.claims().find_map(|(provenance, ability)| {
            let key = (provenance, ability);
            match self.claims.get(&key) {
                Some(existing) if existing != &manifest.id => Some(EngineError::Conflict {
                    plugin: manifest.id.clone(),
                    existing: existing.clone(),
                    provenance: key.0,
                    ability: key.1,
                }),
                _ => None,
            }
        })
    }

    fn release_claims(&mut self, plugin_id: &str) {
        self.claims.retain(|_, holder| holder != plugin_id);
    }
}

/// Registration summary returned by [`CapabilityRegistry::plugins`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub manifest: PluginManifest,
    pub status: PluginStatus,
}

/// An enabled plugin handed out for one request.
///
/// The lease is revoked when the plugin is disabled or disposed, so in-flight work can fail
/// with [`EngineError::PluginUnavailable`] instead of completing against a dead plugin.
#[derive(Clone)]
pub struct PluginLease {
    plugin_id: String,
    plugin: Arc<dyn MediaPlugin>,
    liveness: CancellationToken,
}

impl PluginLease {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn plugin(&self) -> &Arc<dyn MediaPlugin> {
        &self.plugin
    }

    pub fn is_revoked(&self) -> bool {
        self.liveness.is_cancelled()
    }

    /// Completes once the plugin is disabled or disposed.
    pub async fn revoked(&self) {
        self.liveness.cancelled().await
    }
}

impl std::fmt::Debug for PluginLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLease")
            .field("plugin_id", &self.plugin_id)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

/// Process-wide plugin registry, shared by every player instance through an `Arc`.
#[derive(Default)]
pub struct CapabilityRegistry {
    lifecycle: tokio::sync::Mutex<()>,
    committed: RwLock<Arc<Committed>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Committed> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn commit(&self, next: Committed) {
        *self
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    /// Add a plugin in `registered` status.
    ///
    /// Fails with [`EngineError::Conflict`] when any key it declares is claimed by another
    /// enabled plugin. A disposed registration with the same id is replaced.
    pub async fn register(&self, plugin: Arc<dyn MediaPlugin>) -> Result<(), EngineError> {
        let _guard = self.lifecycle.lock().await;
        let mut next = (*self.snapshot()).clone();
        let manifest = plugin.manifest().clone();

        if let Some(existing) = next.registrations.get(&manifest.id) {
            if existing.status != PluginStatus::Disposed {
                return Err(EngineError::AlreadyRegistered(manifest.id));
            }
        }
        if let Some(conflict) = next.first_conflict(&manifest) {
            tracing::warn!(plugin = %manifest.id, error = %conflict, "plugin registration rejected");
            return Err(conflict);
        }

        tracing::info!(
            plugin = %manifest.id,
            abilities = ?manifest.abilities,
            provenances = ?manifest.provenances,
            "plugin registered"
        );
        next.registrations.insert(
            manifest.id.clone(),
            Registration {
                plugin,
                status: PluginStatus::Registered,
                liveness: CancellationToken::new(),
            },
        );
        self.commit(next);
        Ok(())
    }

    /// Initialize the plugin and make its claims visible to lookups.
    pub async fn enable(&self, plugin_id: &str) -> Result<(), EngineError> {
        let _guard = self.lifecycle.lock().await;
        let mut next = (*self.snapshot()).clone();
        let registration = next.registration(plugin_id)?.clone();

        match registration.status {
            PluginStatus::Enabled => return Ok(()),
            PluginStatus::Disposed => {
                return Err(EngineError::InvalidLifecycle {
                    plugin: plugin_id.to_string(),
                    status: PluginStatus::Disposed,
                });
            }
            PluginStatus::Registered | PluginStatus::Disabled => {}
        }

        let manifest = registration.plugin.manifest().clone();
        if let Some(conflict) = next.first_conflict(&manifest) {
            tracing::warn!(plugin = %plugin_id, error = %conflict, "plugin enable rejected");
            return Err(conflict);
        }

        if let Err(err) = registration.plugin.initialize().await {
            tracing::warn!(plugin = %plugin_id, error = %err, "plugin failed to initialize");
            return Err(EngineError::PluginUnavailable(plugin_id.to_string()));
        }

        for key in manifest.claims() {
            next.claims.insert(key, plugin_id.to_string());
        }
        next.registrations.insert(
            plugin_id.to_string(),
            Registration {
                plugin: registration.plugin,
                status: PluginStatus::Enabled,
                liveness: CancellationToken::new(),
            },
        );
        self.commit(next);
        tracing::info!(plugin = %plugin_id, "plugin enabled");
        Ok(())
    }

    /// Withdraw the plugin's claims and revoke outstanding leases.
    pub async fn disable(&self, plugin_id: &str) -> Result<(), EngineError> {
        let _guard = self.lifecycle.lock().await;
        let mut next = (*self.snapshot()).clone();
        let registration = next.registration(plugin_id)?.clone();

        match registration.status {
            PluginStatus::Enabled => {}
            PluginStatus::Disposed => {
                return Err(EngineError::InvalidLifecycle {
                    plugin: plugin_id.to_string(),
                    status: PluginStatus::Disposed,
                });
            }
            PluginStatus::Registered | PluginStatus::Disabled => return Ok(()),
        }

        next.release_claims(plugin_id);
        if let Some(entry) = next.registrations.get_mut(plugin_id) {
            entry.status = PluginStatus::Disabled;
        }
        self.commit(next);
        registration.liveness.cancel();
        tracing::info!(plugin = %plugin_id, "plugin disabled");
        Ok(())
    }

    /// Release the plugin's resources. Irreversible: the id can only be registered again
    /// with a fresh instance.
    pub async fn dispose(&self, plugin_id: &str) -> Result<(), EngineError> {
        let _guard = self.lifecycle.lock().await;
        let mut next = (*self.snapshot()).clone();
        let registration = next.registration(plugin_id)?.clone();

        if registration.status == PluginStatus::Disposed {
            return Ok(());
        }

        next.release_claims(plugin_id);
        if let Some(entry) = next.registrations.get_mut(plugin_id) {
            entry.status = PluginStatus::Disposed;
        }
        self.commit(next);
        registration.liveness.cancel();
        registration.plugin.dispose();
        tracing::info!(plugin = %plugin_id, "plugin disposed");
        Ok(())
    }

    /// The enabled plugin claiming `(provenance, ability)`.
    pub fn find_for_resolution(
        &self,
        provenance: &Provenance,
        ability: Ability,
    ) -> Result<PluginLease, EngineError> {
        let committed = self.snapshot();
        let not_found = || EngineError::NotFound {
            provenance: provenance.clone(),
            ability,
        };
        let plugin_id = committed
            .claims
            .get(&(provenance.clone(), ability))
            .ok_or_else(not_found)?;
        let registration = committed.registrations.get(plugin_id).ok_or_else(not_found)?;
        Ok(PluginLease {
            plugin_id: plugin_id.clone(),
            plugin: registration.plugin.clone(),
            liveness: registration.liveness.clone(),
        })
    }

    pub fn status(&self, plugin_id: &str) -> Option<PluginStatus> {
        self.snapshot()
            .registrations
            .get(plugin_id)
            .map(|registration| registration.status)
    }

    /// All registrations, ordered by id.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        let committed = self.snapshot();
        let mut plugins: Vec<PluginInfo> = committed
            .registrations
            .values()
            .map(|registration| PluginInfo {
                manifest: registration.plugin.manifest().clone(),
                status: registration.status,
            })
            .collect();
        plugins.sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));
        plugins
    }

    /// Register and enable in one step.
    pub async fn install(&self, plugin: Arc<dyn MediaPlugin>) -> Result<(), EngineError> {
        let plugin_id = plugin.manifest().id.clone();
        self.register(plugin).await?;
        self.enable(&plugin_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedPlugin;

    fn provider_a() -> Provenance {
        Provenance::remote("provider-A")
    }

    #[tokio::test]
    async fn second_claim_on_same_key_is_rejected() {
        let registry = CapabilityRegistry::new();
        registry
            .install(ScriptedPlugin::resolver("first", provider_a()).shared())
            .await
            .unwrap();

        let result = registry
            .register(ScriptedPlugin::resolver("second", provider_a()).shared())
            .await;

        assert!(matches!(
            result,
            Err(EngineError::Conflict { ref plugin, ref existing, ability: Ability::ResolveStream, .. })
                if plugin == "second" && existing == "first"
        ));
        assert_eq!(registry.status("second"), None);
    }

    #[tokio::test]
    async fn disabling_frees_claims_for_another_plugin() {
        let registry = CapabilityRegistry::new();
        registry
            .install(ScriptedPlugin::resolver("first", provider_a()).shared())
            .await
            .unwrap();
        registry.disable("first").await.unwrap();

        registry
            .install(ScriptedPlugin::resolver("second", provider_a()).shared())
            .await
            .unwrap();

        let lease = registry
            .find_for_resolution(&provider_a(), Ability::ResolveStream)
            .unwrap();
        assert_eq!(lease.plugin_id(), "second");
        assert!(matches!(
            registry.enable("first").await,
            Err(EngineError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn lookup_reports_not_found_for_unclaimed_keys() {
        let registry = CapabilityRegistry::new();
        registry
            .register(ScriptedPlugin::resolver("first", provider_a()).shared())
            .await
            .unwrap();

        let registered_only = registry.find_for_resolution(&provider_a(), Ability::ResolveStream);
        assert!(matches!(registered_only, Err(EngineError::NotFound { .. })));

        registry.enable("first").await.unwrap();
        let wrong_ability = registry.find_for_resolution(&provider_a(), Ability::Lyrics);
        assert!(matches!(
            wrong_ability,
            Err(EngineError::NotFound { ability: Ability::Lyrics, .. })
        ));
    }

    #[tokio::test]
    async fn disable_revokes_outstanding_leases() {
        let registry = CapabilityRegistry::new();
        registry
            .install(ScriptedPlugin::resolver("first", provider_a()).shared())
            .await
            .unwrap();
        let lease = registry
            .find_for_resolution(&provider_a(), Ability::ResolveStream)
            .unwrap();
        assert!(!lease.is_revoked());

        registry.disable("first").await.unwrap();

        assert!(lease.is_revoked());
        lease.revoked().await;
    }

    #[tokio::test]
    async fn dispose_is_irreversible_until_reregistered() {
        let registry = CapabilityRegistry::new();
        let plugin = ScriptedPlugin::resolver("first", provider_a());
        let disposed = plugin.disposed_flag();
        registry.install(plugin.shared()).await.unwrap();

        registry.dispose("first").await.unwrap();

        assert!(disposed.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(registry.status("first"), Some(PluginStatus::Disposed));
        assert!(matches!(
            registry.enable("first").await,
            Err(EngineError::InvalidLifecycle { status: PluginStatus::Disposed, .. })
        ));

        registry
            .install(ScriptedPlugin::resolver("first", provider_a()).shared())
            .await
            .unwrap();
        assert_eq!(registry.status("first"), Some(PluginStatus::Enabled));
    }

    #[tokio::test]
    async fn duplicate_live_id_is_rejected() {
        let registry = CapabilityRegistry::new();
        registry
            .register(ScriptedPlugin::resolver("first", provider_a()).shared())
            .await
            .unwrap();
        let again = registry
            .register(ScriptedPlugin::resolver("first", Provenance::Local).shared())
            .await;
        assert_eq!(again, Err(EngineError::AlreadyRegistered("first".into())));
    }

    #[tokio::test]
    async fn failed_initialize_keeps_plugin_registered() {
        let registry = CapabilityRegistry::new();
        let plugin = ScriptedPlugin::resolver("flaky", provider_a()).failing_initialize();
        registry.register(plugin.shared()).await.unwrap();

        let result = registry.enable("flaky").await;

        assert_eq!(result, Err(EngineError::PluginUnavailable("flaky".into())));
        assert_eq!(registry.status("flaky"), Some(PluginStatus::Registered));
        assert!(
            registry
                .find_for_resolution(&provider_a(), Ability::ResolveStream)
                .is_err()
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let registry = CapabilityRegistry::new();
        assert_eq!(
            registry.enable("ghost").await,
            Err(EngineError::UnknownPlugin("ghost".into()))
        );
        assert_eq!(
            registry.disable("ghost").await,
            Err(EngineError::UnknownPlugin("ghost".into()))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enables_leave_exactly_one_claimant() {
        let registry = Arc::new(CapabilityRegistry::new());
        for i in 0..8 {
            registry
                .register(ScriptedPlugin::resolver(&format!("p{i}"), provider_a()).shared())
                .await
                .unwrap();
        }

        let mut tasks = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.enable(&format!("p{i}")).await
            }));
        }
        let mut enabled = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                enabled += 1;
            }
        }

        assert_eq!(enabled, 1);
        let statuses: Vec<_> = registry.plugins().into_iter().map(|p| p.status).collect();
        assert_eq!(
            statuses.iter().filter(|s| **s == PluginStatus::Enabled).count(),
            1
        );
    }

    #[tokio::test]
    async fn plugins_are_listed_by_id() {
        let registry = CapabilityRegistry::new();
        registry
            .register(ScriptedPlugin::resolver("zeta", Provenance::remote("z")).shared())
            .await
            .unwrap();
        registry
            .install(ScriptedPlugin::resolver("alpha", Provenance::remote("a")).shared())
            .await
            .unwrap();

        let plugins = registry.plugins();
        assert_eq!(plugins[0].manifest.id, "alpha");
        assert_eq!(plugins[0].status, PluginStatus::Enabled);
        assert_eq!(plugins[1].manifest.id, "zeta");
        assert_eq!(plugins[1].status, PluginStatus::Registered);
    }
}
