//! Scripted plugin and recording sink shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use media_engine_types::{
    Ability, Lyrics, Provenance, SharedDescriptor, SourceDescriptor, StreamHandle, StreamSource,
    TrackMetadata,
};

use crate::plugin::{MediaPlugin, PluginManifest};
use crate::sink::{DeviceSink, SinkNotifier};

pub(crate) fn descriptor(id: &str, provenance: Provenance) -> SharedDescriptor {
    SourceDescriptor::new(id, provenance, TrackMetadata::titled(id)).shared()
}

pub(crate) fn timed_descriptor(id: &str, provenance: Provenance, duration_ms: u64) -> SharedDescriptor {
    let mut metadata = TrackMetadata::titled(id);
    metadata.duration_ms = Some(duration_ms);
    SourceDescriptor::new(id, provenance, metadata).shared()
}

/// Plugin whose behaviour is fixed up front. Resolves `id` to `stream://<plugin>/<id>`.
pub(crate) struct ScriptedPlugin {
    manifest: PluginManifest,
    delay: Duration,
    delays: HashMap<String, Duration>,
    failure: Option<String>,
    failing_initialize: bool,
    expired: bool,
    expires_in: Option<Duration>,
    catalog: Vec<SourceDescriptor>,
    lyrics: Option<Lyrics>,
    disposed: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
}

impl ScriptedPlugin {
    pub(crate) fn resolver(id: &str, provenance: Provenance) -> Self {
        Self {
            manifest: PluginManifest::new(id, id)
                .ability(Ability::ResolveStream)
                .provenance(provenance),
            delay: Duration::ZERO,
            delays: HashMap::new(),
            failure: None,
            failing_initialize: false,
            expired: false,
            expires_in: None,
            catalog: Vec::new(),
            lyrics: None,
            disposed: Arc::new(AtomicBool::new(false)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_delay_for(mut self, track: &str, delay: Duration) -> Self {
        self.delays.insert(track.to_string(), delay);
        self
    }

    pub(crate) fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub(crate) fn failing_initialize(mut self) -> Self {
        self.failing_initialize = true;
        self
    }

    pub(crate) fn returning_expired(mut self) -> Self {
        self.expired = true;
        self
    }

    pub(crate) fn expiring_after(mut self, lifetime: Duration) -> Self {
        self.expires_in = Some(lifetime);
        self
    }

    pub(crate) fn with_catalog(mut self, entries: Vec<SourceDescriptor>) -> Self {
        self.manifest = self.manifest.ability(Ability::Search);
        self.catalog = entries;
        self
    }

    pub(crate) fn with_lyrics(mut self, lyrics: Lyrics) -> Self {
        self.manifest = self.manifest.ability(Ability::Lyrics);
        self.lyrics = Some(lyrics);
        self
    }

    pub(crate) fn disposed_flag(&self) -> Arc<AtomicBool> {
        self.disposed.clone()
    }

    /// Counts resolutions that ran to completion, consumed or not.
    pub(crate) fn completed_counter(&self) -> Arc<AtomicUsize> {
        self.completed.clone()
    }

    pub(crate) fn shared(self) -> Arc<dyn MediaPlugin> {
        Arc::new(self)
    }

    async fn pause_for(&self, track: &str) {
        let delay = self.delays.get(track).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MediaPlugin for ScriptedPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn initialize(&self) -> Result<()> {
        if self.failing_initialize {
            return Err(anyhow!("credentials rejected"));
        }
        Ok(())
    }

    async fn resolve_stream(&self, descriptor: &SourceDescriptor) -> Result<StreamHandle> {
        self.pause_for(descriptor.id()).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(anyhow!("{message}"));
        }
        let mut handle = StreamHandle::new(StreamSource::Url(format!(
            "stream://{}/{}",
            self.manifest.id,
            descriptor.id()
        )));
        if self.expired {
            handle = handle.expiring_at(SystemTime::now() - Duration::from_secs(60));
        } else if let Some(lifetime) = self.expires_in {
            handle = handle.expiring_at(SystemTime::now() + lifetime);
        }
        Ok(handle)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SourceDescriptor>> {
        self.pause_for(query).await;
        let needle = query.to_lowercase();
        Ok(self
            .catalog
            .iter()
            .filter(|entry| entry.metadata().title.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn lyrics(&self, descriptor: &SourceDescriptor) -> Result<Option<Lyrics>> {
        self.pause_for(descriptor.id()).await;
        Ok(self.lyrics.clone())
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Calls observed by [`RecordingSink`].
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SinkCall {
    Load(StreamSource),
    Play,
    Pause,
    Seek(u64),
    Volume(f32),
    Rate(f32),
    Stop,
}

/// Test-side view of a [`RecordingSink`]: call log plus the latest notifier.
#[derive(Clone, Default)]
pub(crate) struct SinkProbe {
    calls: Arc<Mutex<Vec<SinkCall>>>,
    notifier: Arc<Mutex<Option<SinkNotifier>>>,
    fail_play: Arc<AtomicBool>,
}

impl SinkProbe {
    pub(crate) fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn loaded(&self) -> Vec<StreamSource> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Load(source) => Some(source),
                _ => None,
            })
            .collect()
    }

    /// Notifier handed to the most recent `load`.
    pub(crate) fn notifier(&self) -> SinkNotifier {
        self.notifier
            .lock()
            .unwrap()
            .clone()
            .expect("sink was never loaded")
    }

    pub(crate) fn fail_next_play(&self) {
        self.fail_play.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

pub(crate) struct RecordingSink {
    probe: SinkProbe,
}

impl RecordingSink {
    pub(crate) fn new() -> (Self, SinkProbe) {
        let probe = SinkProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl DeviceSink for RecordingSink {
    fn load(&mut self, stream: &StreamHandle, notifier: SinkNotifier) -> Result<()> {
        self.probe.record(SinkCall::Load(stream.source.clone()));
        *self.probe.notifier.lock().unwrap() = Some(notifier);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if self.probe.fail_play.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("output device unavailable"));
        }
        self.probe.record(SinkCall::Play);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.probe.record(SinkCall::Pause);
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.probe.record(SinkCall::Seek(position_ms));
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.probe.record(SinkCall::Volume(volume));
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) -> Result<()> {
        self.probe.record(SinkCall::Rate(rate));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.probe.record(SinkCall::Stop);
        Ok(())
    }
}
