//! Plugin contract for source-resolving backends.
//!
//! A plugin declares a manifest (abilities and the provenances it claims) and implements the
//! async operations for the abilities it declares. Dispatch never inspects plugin types: the
//! registry routes by `(provenance, ability)`.

use std::fmt;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use media_engine_types::{Ability, Lyrics, Provenance, SourceDescriptor, StreamHandle};

/// Static declaration of what a plugin offers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Stable plugin id, unique within a registry.
    pub id: String,
    /// Display name.
    pub name: String,
    pub version: String,
    pub abilities: Vec<Ability>,
    /// Provenances this plugin claims for each declared ability.
    pub provenances: Vec<Provenance>,
}

impl PluginManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            abilities: Vec::new(),
            provenances: Vec::new(),
        }
    }

    pub fn ability(mut self, ability: Ability) -> Self {
        if !self.abilities.contains(&ability) {
            self.abilities.push(ability);
        }
        self
    }

    pub fn provenance(mut self, provenance: Provenance) -> Self {
        if !self.provenances.contains(&provenance) {
            self.provenances.push(provenance);
        }
        self
    }

    /// Every `(provenance, ability)` key this manifest claims.
    pub fn claims(&self) -> impl Iterator<Item = (Provenance, Ability)> + '_ {
        self.provenances
            .iter()
            .flat_map(move |p| self.abilities.iter().map(move |a| (p.clone(), *a)))
    }

    pub fn matches(&self, provenance: &Provenance) -> bool {
        self.provenances.contains(provenance)
    }
}

/// Lifecycle status of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Registered,
    Enabled,
    Disabled,
    Disposed,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginStatus::Registered => "registered",
            PluginStatus::Enabled => "enabled",
            PluginStatus::Disabled => "disabled",
            PluginStatus::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Source-resolving backend.
///
/// Resolution futures may be abandoned by the engine (superseded, timed out, plugin disabled);
/// implementations must tolerate their results never being consumed.
#[async_trait]
pub trait MediaPlugin: Send + Sync {
    /// Manifest used for registration. Must not change over the plugin's lifetime.
    fn manifest(&self) -> &PluginManifest;

    /// Called when the plugin is enabled (connect, authenticate, warm caches).
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Resolve a descriptor into a playable stream.
    async fn resolve_stream(&self, descriptor: &SourceDescriptor) -> Result<StreamHandle> {
        Err(anyhow!(
            "{} does not resolve streams for {}",
            self.manifest().id,
            descriptor.provenance()
        ))
    }

    /// Free-text search.
    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<SourceDescriptor>> {
        Err(anyhow!("{} does not support search ({query})", self.manifest().id))
    }

    /// Lyrics lookup. `Ok(None)` means the provider has no lyrics for the track.
    async fn lyrics(&self, descriptor: &SourceDescriptor) -> Result<Option<Lyrics>> {
        Err(anyhow!(
            "{} does not provide lyrics for {}",
            self.manifest().id,
            descriptor.id()
        ))
    }

    /// Release network handles and caches. Called once, when the registration is disposed.
    fn dispose(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_claims_cross_product() {
        let manifest = PluginManifest::new("p", "P")
            .ability(Ability::ResolveStream)
            .ability(Ability::Search)
            .ability(Ability::Search)
            .provenance(Provenance::remote("a"))
            .provenance(Provenance::remote("b"));

        let claims: Vec<_> = manifest.claims().collect();
        assert_eq!(claims.len(), 4);
        assert!(claims.contains(&(Provenance::remote("b"), Ability::Search)));
        assert!(manifest.matches(&Provenance::remote("a")));
        assert!(!manifest.matches(&Provenance::Local));
    }
}
