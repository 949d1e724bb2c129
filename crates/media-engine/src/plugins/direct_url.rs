//! Plain HTTP(S) audio URLs (`remote-url` provenance).

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::json;
use url::Url;

use media_engine_types::{
    Ability, Provenance, SourceDescriptor, StreamHandle, StreamSource, TrackMetadata,
};

use super::{content_type_for_ext, quality_for_ext};
use crate::plugin::{MediaPlugin, PluginManifest};

pub const PLUGIN_ID: &str = "direct-url";
pub const PROVIDER: &str = "url";

pub struct DirectUrlPlugin {
    manifest: PluginManifest,
}

impl Default for DirectUrlPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectUrlPlugin {
    pub fn new() -> Self {
        Self {
            manifest: PluginManifest::new(PLUGIN_ID, "Direct URL")
                .ability(Ability::ResolveStream)
                .provenance(Provenance::remote(PROVIDER)),
        }
    }

    /// Descriptor for `raw`. A parseable URL is stored normalized and titled by its last
    /// path segment; anything else is kept verbatim and rejected at resolution.
    pub fn descriptor_for(raw: &str) -> SourceDescriptor {
        let (location, title) = match Url::parse(raw) {
            Ok(url) => {
                let title = last_segment(&url).unwrap_or_else(|| raw.to_string());
                (url.to_string(), title)
            }
            Err(_) => (raw.to_string(), raw.to_string()),
        };
        SourceDescriptor::new(
            location.clone(),
            Provenance::remote(PROVIDER),
            TrackMetadata::titled(title),
        )
        .with_payload(json!({ "url": location }))
    }
}

/// Parse `raw` as an http(s) URL with a host.
pub fn parse_stream_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid url {raw:?}"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => bail!("unsupported url scheme: {other}"),
    }
    if url.host_str().is_none_or(str::is_empty) {
        bail!("url {raw:?} has no host");
    }
    Ok(url)
}

/// Last non-empty path segment, percent-decoded.
fn last_segment(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(
        urlencoding::decode(segment)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| segment.to_string()),
    )
}

/// Lowercased extension of the last path segment.
fn url_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.last()?;
    let (_, ext) = segment.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

#[async_trait]
impl MediaPlugin for DirectUrlPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn resolve_stream(&self, descriptor: &SourceDescriptor) -> Result<StreamHandle> {
        let Some(raw) = descriptor.payload().get("url").and_then(|v| v.as_str()) else {
            bail!("descriptor {} has no url", descriptor.id());
        };
        let url = parse_stream_url(raw)?;
        let mut handle = StreamHandle::new(StreamSource::Url(url.to_string()));
        if let Some(ext) = url_extension(&url) {
            handle.quality = quality_for_ext(&ext);
            handle.mime_type = content_type_for_ext(&ext).map(str::to_string);
            if handle.mime_type.is_some() {
                handle.codec = Some(ext);
            }
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_http_urls() {
        let plugin = DirectUrlPlugin::new();
        let descriptor = DirectUrlPlugin::descriptor_for("https://cdn.example.com/a/song.opus?sig=1");

        let handle = plugin.resolve_stream(&descriptor).await.unwrap();

        assert_eq!(descriptor.metadata().title, "song.opus");
        assert_eq!(
            handle.source,
            StreamSource::Url("https://cdn.example.com/a/song.opus?sig=1".into())
        );
        assert_eq!(handle.codec.as_deref(), Some("opus"));
        assert_eq!(handle.mime_type.as_deref(), Some("audio/ogg"));
    }

    #[tokio::test]
    async fn scheme_is_case_insensitive() {
        let plugin = DirectUrlPlugin::new();
        let descriptor = DirectUrlPlugin::descriptor_for("HTTPS://CDN.example.com/a/Song.MP3");

        let handle = plugin.resolve_stream(&descriptor).await.unwrap();

        assert_eq!(
            handle.source,
            StreamSource::Url("https://cdn.example.com/a/Song.MP3".into())
        );
        assert_eq!(handle.codec.as_deref(), Some("mp3"));
    }

    #[tokio::test]
    async fn rejects_malformed_and_hostless_urls() {
        let plugin = DirectUrlPlugin::new();
        for raw in [
            "http://",
            "http://bad host/x y.mp3",
            "ftp://example.com/song.mp3",
            "not a url",
            "mailto:someone@example.com",
        ] {
            let descriptor = DirectUrlPlugin::descriptor_for(raw);
            assert!(plugin.resolve_stream(&descriptor).await.is_err(), "{raw}");
        }

        let bare = SourceDescriptor::new(
            "x",
            Provenance::remote(PROVIDER),
            TrackMetadata::titled("x"),
        );
        assert!(plugin.resolve_stream(&bare).await.is_err());
    }

    #[test]
    fn title_is_percent_decoded() {
        let descriptor = DirectUrlPlugin::descriptor_for("http://h/music/My%20Song.flac#t=10");
        assert_eq!(descriptor.metadata().title, "My Song.flac");
    }

    #[test]
    fn extension_ignores_query() {
        let url = Url::parse("http://h/p/track.FLAC?x=1").unwrap();
        assert_eq!(url_extension(&url), Some("flac".into()));
        let bare = Url::parse("http://h/stream").unwrap();
        assert_eq!(url_extension(&bare), None);
    }
}
