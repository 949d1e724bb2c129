//! Files on the local filesystem (`local` provenance).
//!
//! Descriptors carry the absolute path in their `path` payload field; the id is used as a
//! fallback. Search matches file names under the configured library directories. Lyrics come
//! from an `.lrc` file next to the track with the same stem.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::json;

use media_engine_types::{
    Ability, Lyrics, Provenance, SourceDescriptor, StreamHandle, StreamSource, TrackMetadata,
};

use super::{content_type_for_ext, is_supported_extension, quality_for_ext};
use crate::plugin::{MediaPlugin, PluginManifest};

pub const PLUGIN_ID: &str = "local-files";

/// Directories deeper than this below a library root are not searched.
const MAX_SCAN_DEPTH: usize = 8;

pub struct LocalFilePlugin {
    manifest: PluginManifest,
    library_dirs: Vec<PathBuf>,
}

impl LocalFilePlugin {
    pub fn new(library_dirs: Vec<PathBuf>) -> Self {
        Self {
            manifest: PluginManifest::new(PLUGIN_ID, "Local files")
                .ability(Ability::ResolveStream)
                .ability(Ability::Search)
                .ability(Ability::Lyrics)
                .provenance(Provenance::Local),
            library_dirs,
        }
    }

    /// Descriptor for a file path. Title falls back to the file stem.
    pub fn descriptor_for(path: &Path) -> SourceDescriptor {
        let title = path
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or("Unknown")
            .to_string();
        let path_str = path.to_string_lossy().to_string();
        SourceDescriptor::new(path_str.clone(), Provenance::Local, TrackMetadata::titled(title))
            .with_payload(json!({ "path": path_str }))
    }

    fn path_of(descriptor: &SourceDescriptor) -> PathBuf {
        descriptor
            .payload()
            .get("path")
            .and_then(|value| value.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(descriptor.id()))
    }
}

/// `.lrc` file beside `track`: the exact `<stem>.lrc` first, then any case variant of it.
async fn find_sidecar_lrc(track: &Path) -> Result<Option<PathBuf>> {
    let primary = track.with_extension("lrc");
    if tokio::fs::try_exists(&primary).await.unwrap_or(false) {
        return Ok(Some(primary));
    }
    let (Some(parent), Some(stem)) = (track.parent(), track.file_stem().and_then(OsStr::to_str))
    else {
        return Ok(None);
    };
    let mut entries = match tokio::fs::read_dir(parent).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("list {:?}", parent)),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_lrc = extension_of(&path).as_deref() == Some("lrc");
        let same_stem = path
            .file_stem()
            .and_then(OsStr::to_str)
            .is_some_and(|candidate| candidate.eq_ignore_ascii_case(stem));
        if is_lrc && same_stem {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| ext.to_ascii_lowercase())
}

#[async_trait]
impl MediaPlugin for LocalFilePlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn initialize(&self) -> Result<()> {
        for dir in &self.library_dirs {
            let meta = tokio::fs::metadata(dir)
                .await
                .with_context(|| format!("library dir {:?}", dir))?;
            if !meta.is_dir() {
                bail!("library dir {:?} is not a directory", dir);
            }
        }
        tracing::info!(dirs = self.library_dirs.len(), "local library ready");
        Ok(())
    }

    async fn resolve_stream(&self, descriptor: &SourceDescriptor) -> Result<StreamHandle> {
        let path = Self::path_of(descriptor);
        let Some(ext) = extension_of(&path).filter(|ext| is_supported_extension(ext)) else {
            bail!("unsupported audio file {:?}", path);
        };
        let meta = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("stat {:?}", path))?;
        if !meta.is_file() {
            bail!("{:?} is not a file", path);
        }

        let mut handle = StreamHandle::new(StreamSource::Path(path))
            .with_quality(quality_for_ext(&ext))
            .with_codec(ext.clone());
        handle.mime_type = content_type_for_ext(&ext).map(str::to_string);
        Ok(handle)
    }

    async fn lyrics(&self, descriptor: &SourceDescriptor) -> Result<Option<Lyrics>> {
        let track = Self::path_of(descriptor);
        let Some(sidecar) = find_sidecar_lrc(&track).await? else {
            tracing::debug!(track = ?track, "no lyrics file");
            return Ok(None);
        };
        let raw = tokio::fs::read_to_string(&sidecar)
            .await
            .with_context(|| format!("read lyrics {:?}", sidecar))?;
        let mut lyrics = Lyrics::from_lrc(&raw);
        if lyrics.synced.is_empty() {
            // Untimed file: keep it as plain text.
            let text = raw.trim();
            if text.is_empty() {
                return Ok(None);
            }
            lyrics.plain_text = Some(text.to_string());
        }
        lyrics.source = Some(sidecar.to_string_lossy().to_string());
        Ok(Some(lyrics))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SourceDescriptor>> {
        let needle = query.to_lowercase();
        let mut found = Vec::new();
        let mut pending: Vec<(PathBuf, usize)> =
            self.library_dirs.iter().cloned().map(|dir| (dir, 0)).collect();

        while let Some((dir, depth)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(dir = ?dir, error = %err, "skipping unreadable directory");
                    continue;
                }
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if depth < MAX_SCAN_DEPTH {
                        pending.push((path, depth + 1));
                    }
                    continue;
                }
                let supported = extension_of(&path).is_some_and(|ext| is_supported_extension(&ext));
                let matches = path
                    .file_name()
                    .and_then(OsStr::to_str)
                    .is_some_and(|name| name.to_lowercase().contains(&needle));
                if supported && matches {
                    found.push(path);
                }
            }
        }

        found.sort();
        Ok(found
            .iter()
            .take(limit)
            .map(|path| Self::descriptor_for(path))
            .collect())
    }
}
