use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Origin category of a playable item.
///
/// Serialized as `local` or `remote-<provider>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Provenance {
    /// A file on the local filesystem.
    Local,
    /// A remote provider, identified by name (for example `remote-url`).
    Remote(String),
}

impl Provenance {
    /// Shorthand for a remote provider provenance.
    pub fn remote(provider: impl Into<String>) -> Self {
        Provenance::Remote(provider.into())
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Local => f.write_str("local"),
            Provenance::Remote(provider) => write!(f, "remote-{provider}"),
        }
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "local" {
            return Ok(Provenance::Local);
        }
        match s.strip_prefix("remote-") {
            Some(provider) if !provider.is_empty() => Ok(Provenance::Remote(provider.to_string())),
            _ => Err(format!("invalid provenance: {s}")),
        }
    }
}

impl From<Provenance> for String {
    fn from(value: Provenance) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Provenance {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Capability a plugin may offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Ability {
    /// Free-text search returning source descriptors.
    Search,
    /// Turning a descriptor into a playable stream handle.
    ResolveStream,
    /// Lyric lookup for a descriptor.
    Lyrics,
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ability::Search => "search",
            Ability::ResolveStream => "resolveStream",
            Ability::Lyrics => "lyrics",
        };
        f.write_str(name)
    }
}

/// Display metadata carried by a descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Track title.
    pub title: String,
    /// Primary artist name.
    pub artist: Option<String>,
    /// Album name.
    pub album: Option<String>,
    /// Duration hint in milliseconds; the sink may report the real value later.
    pub duration_ms: Option<u64>,
    /// Artwork URL or path.
    pub artwork: Option<String>,
}

impl TrackMetadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Inert description of a playable item.
///
/// Immutable once built; queue entries share it through [`SharedDescriptor`].
/// The `payload` is interpreted only by the plugin owning the provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    id: String,
    provenance: Provenance,
    metadata: TrackMetadata,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Reference-counted descriptor as held by queue entries and the player.
pub type SharedDescriptor = Arc<SourceDescriptor>;

impl SourceDescriptor {
    pub fn new(id: impl Into<String>, provenance: Provenance, metadata: TrackMetadata) -> Self {
        Self {
            id: id.into(),
            provenance,
            metadata,
            payload: serde_json::Value::Null,
        }
    }

    /// Attach the provenance-specific payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Finish building and wrap for sharing.
    pub fn shared(self) -> SharedDescriptor {
        Arc::new(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn metadata(&self) -> &TrackMetadata {
        &self.metadata
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// Where the sink should read bytes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum StreamSource {
    Url(String),
    Path(PathBuf),
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Url(url) => f.write_str(url),
            StreamSource::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Coarse quality tier of a resolved stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamQuality {
    /// Around 96 kbps.
    Low,
    /// Around 160 kbps.
    Medium,
    /// 256 kbps and above.
    High,
    /// FLAC/WAV and other lossless formats.
    Lossless,
    #[default]
    Unknown,
}

/// Resolved, directly playable representation of a descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHandle {
    /// Byte source handed to the sink.
    pub source: StreamSource,
    /// Quality tier.
    pub quality: StreamQuality,
    /// Nominal bitrate in kbps, when known.
    pub bitrate_kbps: Option<u32>,
    /// Codec label (for example `flac`, `opus`).
    pub codec: Option<String>,
    /// MIME type, when known.
    pub mime_type: Option<String>,
    /// Unix time in milliseconds after which the source is no longer valid.
    pub expires_at_ms: Option<u64>,
}

impl StreamHandle {
    pub fn new(source: StreamSource) -> Self {
        Self {
            source,
            quality: StreamQuality::Unknown,
            bitrate_kbps: None,
            codec: None,
            mime_type: None,
            expires_at_ms: None,
        }
    }

    pub fn with_quality(mut self, quality: StreamQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    pub fn expiring_at(mut self, at: SystemTime) -> Self {
        self.expires_at_ms = Some(unix_ms(at));
        self
    }

    /// Whether the handle has expired at `now`. Handles without a hint never expire.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at_ms
            .map(|expires| unix_ms(now) >= expires)
            .unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }
}

fn unix_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Transport state of a player instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Buffering,
    Ended,
    Error,
}

impl TransportState {
    /// States in which the sink holds a loaded stream.
    pub fn has_stream(self) -> bool {
        matches!(
            self,
            TransportState::Playing | TransportState::Paused | TransportState::Buffering
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Idle => "idle",
            TransportState::Loading => "loading",
            TransportState::Playing => "playing",
            TransportState::Paused => "paused",
            TransportState::Buffering => "buffering",
            TransportState::Ended => "ended",
            TransportState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Queue loop policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    Off,
    One,
    All,
}

impl FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(LoopMode::Off),
            "one" => Ok(LoopMode::One),
            "all" => Ok(LoopMode::All),
            other => Err(format!("invalid loop mode: {other}")),
        }
    }
}

/// Error category published on the event bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    NotFound,
    PluginUnavailable,
    ResolutionTimeout,
    ResolutionFailed,
    Sink,
    Other,
}

/// Last error recorded by a player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

/// Transport commands, as named in `commandIgnored` diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Play,
    Pause,
    Resume,
    Stop,
    Seek,
    SetVolume,
    SetRate,
    Retry,
    Next,
    Previous,
    SkipTo,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Play => "play",
            CommandKind::Pause => "pause",
            CommandKind::Resume => "resume",
            CommandKind::Stop => "stop",
            CommandKind::Seek => "seek",
            CommandKind::SetVolume => "set_volume",
            CommandKind::SetRate => "set_rate",
            CommandKind::Retry => "retry",
            CommandKind::Next => "next",
            CommandKind::Previous => "previous",
            CommandKind::SkipTo => "skip_to",
        };
        f.write_str(name)
    }
}

/// Queue contents and policies at a point in time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub items: Vec<SharedDescriptor>,
    /// Index of the current entry; `None` only when the queue is empty.
    pub cursor: Option<usize>,
    pub loop_mode: LoopMode,
    pub shuffle: bool,
}

/// Notification published by a player on every observable change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        previous: TransportState,
        state: TransportState,
    },
    #[serde(rename_all = "camelCase")]
    TrackChanged { track: Option<SharedDescriptor> },
    #[serde(rename_all = "camelCase")]
    Progress {
        elapsed_ms: u64,
        duration_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Error { error: ErrorInfo },
    #[serde(rename_all = "camelCase")]
    CommandIgnored {
        command: CommandKind,
        state: TransportState,
    },
    #[serde(rename_all = "camelCase")]
    VolumeChanged { volume: f32, muted: bool },
    #[serde(rename_all = "camelCase")]
    RateChanged { rate: f32 },
    #[serde(rename_all = "camelCase")]
    QueueChanged { queue: QueueSnapshot },
}

impl PlayerEvent {
    /// Discrete events are dispatched immediately; progress is coalesced.
    pub fn is_progress(&self) -> bool {
        matches!(self, PlayerEvent::Progress { .. })
    }
}

/// Player status returned to hosts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub state: TransportState,
    /// Current track; `None` in `idle`.
    pub track: Option<SharedDescriptor>,
    /// Stream handle owned by the current playback session.
    pub stream: Option<StreamHandle>,
    pub elapsed_ms: u64,
    pub duration_ms: Option<u64>,
    /// Volume level in `0.0..=1.0`.
    pub volume: f32,
    pub muted: bool,
    /// Playback speed multiplier in `0.5..=2.0`.
    pub rate: f32,
    /// Set only in `error`.
    pub last_error: Option<ErrorInfo>,
    pub queue: QueueSnapshot,
}

/// One timed lyric line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedLine {
    pub time_ms: u64,
    pub text: String,
}

/// Lyrics returned by a lyrics-capable plugin.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lyrics {
    pub plain_text: Option<String>,
    pub synced: Vec<SyncedLine>,
    /// Provider label, for attribution.
    pub source: Option<String>,
}

impl Lyrics {
    /// Parse LRC text (`[mm:ss.xx] line`).
    ///
    /// A line may carry several timestamps and yields one entry per timestamp. Metadata tags
    /// such as `[ar:...]` and lines without text are skipped. Entries are sorted by time.
    pub fn from_lrc(raw: &str) -> Self {
        let mut synced = Vec::new();
        for row in raw.lines() {
            let mut rest = row.trim();
            let mut stamps = Vec::new();
            while let Some(tagged) = rest.strip_prefix('[') {
                let Some(end) = tagged.find(']') else {
                    break;
                };
                if let Some(ms) = parse_lrc_timestamp(&tagged[..end]) {
                    stamps.push(ms);
                }
                rest = tagged[end + 1..].trim_start();
            }
            let text = rest.trim();
            if stamps.is_empty() || text.is_empty() {
                continue;
            }
            synced.extend(stamps.into_iter().map(|time_ms| SyncedLine {
                time_ms,
                text: text.to_string(),
            }));
        }
        synced.sort_by_key(|line| line.time_ms);

        let plain = synced
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            plain_text: (!plain.is_empty()).then_some(plain),
            synced,
            source: None,
        }
    }

    /// Index of the synced line showing at `position_ms`, if any has started.
    pub fn line_at(&self, position_ms: u64) -> Option<usize> {
        self.synced
            .partition_point(|line| line.time_ms <= position_ms)
            .checked_sub(1)
    }
}

/// `mm:ss`, `mm:ss.xx` or `mm:ss.xxx` in milliseconds.
fn parse_lrc_timestamp(tag: &str) -> Option<u64> {
    let (minutes, rest) = tag.split_once(':')?;
    let (seconds, fraction) = rest.split_once('.').unwrap_or((rest, ""));
    let minutes: u64 = minutes.trim().parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    if seconds >= 60 || fraction.len() > 3 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let fraction_ms = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<3}").parse::<u64>().ok()?
    };
    Some(minutes * 60_000 + seconds * 1_000 + fraction_ms)
}
