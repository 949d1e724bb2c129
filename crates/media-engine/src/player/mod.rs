//! Player: one transport state machine driving one sink.
//!
//! [`Player`] is a cheap handle to a task that applies commands in order. Resolution runs on
//! separate tasks and reports back tagged with the session it was started for, so results and
//! sink callbacks from superseded or stopped sessions are discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};

use media_engine_types::{
    CommandKind, LoopMode, PlayerEvent, PlayerSnapshot, SharedDescriptor, StreamHandle,
    TransportState,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EventBus, ProgressCoalescer};
use crate::queue::PlayQueue;
use crate::registry::CapabilityRegistry;
use crate::resolver::SourceResolver;
use crate::sink::{DeviceSink, SinkEvent, SinkNotifier, SinkSignal};
use crate::transport::{TransportMachine, Trigger};


type Reply = oneshot::Sender<Result<(), EngineError>>;

/// Slowest playback rate accepted by [`Player::set_rate`].
pub const MIN_PLAYBACK_RATE: f32 = 0.5;
/// Fastest playback rate accepted by [`Player::set_rate`].
pub const MAX_PLAYBACK_RATE: f32 = 2.0;

/// Commands accepted by the player task.
enum Command {
    Play {
        descriptor: SharedDescriptor,
        reply: Reply,
    },
    PlayAll {
        descriptors: Vec<SharedDescriptor>,
        start: usize,
        reply: Reply,
    },
    Pause,
    Resume,
    Stop,
    Seek(u64),
    SetVolume(f32),
    SetMuted(bool),
    SetRate(f32),
    Retry(Reply),
    Next(Reply),
    Previous(Reply),
    SkipTo {
        index: usize,
        reply: Reply,
    },
    Enqueue {
        descriptor: SharedDescriptor,
        position: Option<usize>,
    },
    Remove(usize),
    Reorder {
        from: usize,
        to: usize,
    },
    ClearQueue,
    SetLoopMode(LoopMode),
    SetShuffle(bool),
    Snapshot(oneshot::Sender<PlayerSnapshot>),
    Shutdown,
}

/// Completion of a track request: `Ok` once the sink confirmed start.
///
/// Dropping the outcome does not cancel the request.
pub struct PlayOutcome {
    rx: Option<oneshot::Receiver<Result<(), EngineError>>>,
}

impl Future for PlayOutcome {
    type Output = Result<(), EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.rx.as_mut() {
            None => Poll::Ready(Err(EngineError::PlayerClosed)),
            Some(rx) => Pin::new(rx)
                .poll(cx)
                .map(|reply| reply.unwrap_or(Err(EngineError::PlayerClosed))),
        }
    }
}

/// Handle to a running player. Clones share the same player.
#[derive(Clone)]
pub struct Player {
    commands: mpsc::UnboundedSender<Command>,
    events: EventBus,
}

impl Player {
    /// Start a player task on the current tokio runtime.
    pub fn spawn(
        config: EngineConfig,
        registry: Arc<CapabilityRegistry>,
        sink: Box<dyn DeviceSink>,
    ) -> Self {
        Self::spawn_with_events(config, registry, sink, EventBus::new())
    }

    /// Like [`Player::spawn`], publishing on an existing bus.
    pub fn spawn_with_events(
        config: EngineConfig,
        registry: Arc<CapabilityRegistry>,
        sink: Box<dyn DeviceSink>,
        events: EventBus,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
        let task = PlayerTask::new(config, registry, sink, events.clone(), sink_tx, resolved_tx);
        tokio::spawn(task.run(command_rx, sink_rx, resolved_rx));
        Self { commands, events }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Resolve and start `descriptor`, superseding any track being loaded.
    ///
    /// The descriptor becomes the queue's current entry (inserted after the cursor when it is
    /// not queued yet).
    pub fn play(&self, descriptor: SharedDescriptor) -> PlayOutcome {
        self.request(|reply| Command::Play { descriptor, reply })
    }

    /// Replace the queue with `descriptors` (shuffle off) and start the entry at `start`.
    ///
    /// An empty list or an out-of-range `start` is ignored and leaves the queue untouched.
    pub fn play_all(&self, descriptors: Vec<SharedDescriptor>, start: usize) -> PlayOutcome {
        self.request(|reply| Command::PlayAll {
            descriptors,
            start,
            reply,
        })
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.send(Command::Resume)
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.send(Command::Stop)
    }

    pub fn seek(&self, position_ms: u64) -> Result<(), EngineError> {
        self.send(Command::Seek(position_ms))
    }

    /// Set the volume (`0.0..=1.0`, clamped). Stored even when nothing is playing.
    pub fn set_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.send(Command::SetVolume(volume))
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), EngineError> {
        self.send(Command::SetMuted(muted))
    }

    /// Set the playback speed, clamped to `MIN_PLAYBACK_RATE..=MAX_PLAYBACK_RATE`. Kept across
    /// tracks and applied to every stream the sink loads.
    pub fn set_rate(&self, rate: f32) -> Result<(), EngineError> {
        self.send(Command::SetRate(rate))
    }

    /// Load the current track again after an error.
    pub fn retry(&self) -> PlayOutcome {
        self.request(Command::Retry)
    }

    pub fn next(&self) -> PlayOutcome {
        self.request(Command::Next)
    }

    /// Restart the current track when it is past the restart threshold, otherwise step back.
    pub fn previous(&self) -> PlayOutcome {
        self.request(Command::Previous)
    }

    pub fn skip_to(&self, index: usize) -> PlayOutcome {
        self.request(|reply| Command::SkipTo { index, reply })
    }

    pub fn enqueue(
        &self,
        descriptor: SharedDescriptor,
        position: Option<usize>,
    ) -> Result<(), EngineError> {
        self.send(Command::Enqueue {
            descriptor,
            position,
        })
    }

    pub fn remove_from_queue(&self, index: usize) -> Result<(), EngineError> {
        self.send(Command::Remove(index))
    }

    pub fn move_in_queue(&self, from: usize, to: usize) -> Result<(), EngineError> {
        self.send(Command::Reorder { from, to })
    }

    pub fn clear_queue(&self) -> Result<(), EngineError> {
        self.send(Command::ClearQueue)
    }

    pub fn set_loop_mode(&self, mode: LoopMode) -> Result<(), EngineError> {
        self.send(Command::SetLoopMode(mode))
    }

    pub fn set_shuffle(&self, enabled: bool) -> Result<(), EngineError> {
        self.send(Command::SetShuffle(enabled))
    }

    /// Current status, taken after every previously issued command has been applied.
    pub async fn snapshot(&self) -> Result<PlayerSnapshot, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| EngineError::PlayerClosed)
    }

    /// Stop playback and end the player task.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::PlayerClosed)
    }

    fn request(&self, build: impl FnOnce(Reply) -> Command) -> PlayOutcome {
        let (tx, rx) = oneshot::channel();
        PlayOutcome {
            rx: self.send(build(tx)).ok().map(|()| rx),
        }
    }
}

struct Loading {
    descriptor: SharedDescriptor,
    waiters: Vec<Reply>,
}

struct Resolved {
    session: u64,
    result: Result<StreamHandle, EngineError>,
}

struct PlayerTask {
    config: EngineConfig,
    machine: TransportMachine,
    resolver: SourceResolver,
    sink: Box<dyn DeviceSink>,
    events: EventBus,
    queue: PlayQueue,
    progress: ProgressCoalescer,
    /// Bumped whenever the current playback session is replaced or torn down.
    session: u64,
    track: Option<SharedDescriptor>,
    stream: Option<StreamHandle>,
    loading: Option<Loading>,
    elapsed_ms: u64,
    duration_ms: Option<u64>,
    volume: f32,
    muted: bool,
    rate: f32,
    /// Seek requested while loading, or the position to restore after a reload.
    pending_seek: Option<u64>,
    last_error: Option<EngineError>,
    sink_tx: mpsc::UnboundedSender<SinkSignal>,
    resolved_tx: mpsc::UnboundedSender<Resolved>,
}

impl PlayerTask {
    fn new(
        config: EngineConfig,
        registry: Arc<CapabilityRegistry>,
        sink: Box<dyn DeviceSink>,
        events: EventBus,
        sink_tx: mpsc::UnboundedSender<SinkSignal>,
        resolved_tx: mpsc::UnboundedSender<Resolved>,
    ) -> Self {
        let queue = config
            .shuffle_seed
            .map(PlayQueue::new)
            .unwrap_or_default();
        Self {
            machine: TransportMachine::default(),
            resolver: SourceResolver::new(registry, config.resolution_timeout()),
            sink,
            events,
            queue,
            progress: ProgressCoalescer::new(config.progress_interval()),
            session: 0,
            track: None,
            stream: None,
            loading: None,
            elapsed_ms: 0,
            duration_ms: None,
            volume: config.initial_volume.clamp(0.0, 1.0),
            muted: false,
            rate: 1.0,
            pending_seek: None,
            last_error: None,
            sink_tx,
            resolved_tx,
            config,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut sink_rx: mpsc::UnboundedReceiver<SinkSignal>,
        mut resolved_rx: mpsc::UnboundedReceiver<Resolved>,
    ) {
        tracing::debug!("player task started");
        loop {
            let flush_at = self.progress.deadline();
            tokio::select! {
                biased;
                Some(signal) = sink_rx.recv() => self.on_sink(signal),
                Some(resolved) = resolved_rx.recv() => self.on_resolved(resolved),
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    self.flush_progress();
                }
            }
        }
        self.stop();
        tracing::debug!("player task stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Play { descriptor, reply } => self.play(descriptor, reply),
            Command::PlayAll {
                descriptors,
                start,
                reply,
            } => self.play_all(descriptors, start, reply),
            Command::Pause => self.drive(Trigger::Pause, CommandKind::Pause, |sink| sink.pause()),
            Command::Resume => self.resume(),
            Command::Stop | Command::Shutdown => self.stop(),
            Command::Seek(position_ms) => self.seek(position_ms),
            Command::SetVolume(volume) => self.set_volume(volume),
            Command::SetMuted(muted) => self.set_muted(muted),
            Command::SetRate(rate) => self.set_rate(rate),
            Command::Retry(reply) => self.retry(reply),
            Command::Next(reply) => {
                let next = self.queue.skip_next();
                self.load_from_queue(next, CommandKind::Next, reply);
            }
            Command::Previous(reply) => self.previous(reply),
            Command::SkipTo { index, reply } => {
                let target = self.queue.move_to(index);
                self.load_from_queue(target, CommandKind::SkipTo, reply);
            }
            Command::Enqueue {
                descriptor,
                position,
            } => {
                self.queue.enqueue(descriptor, position);
                self.queue_changed();
            }
            Command::Remove(index) => {
                if self.queue.remove(index).is_some() {
                    self.queue_changed();
                }
            }
            Command::Reorder { from, to } => {
                if self.queue.reorder(from, to) {
                    self.queue_changed();
                }
            }
            Command::ClearQueue => {
                self.queue.clear();
                self.queue_changed();
            }
            Command::SetLoopMode(mode) => {
                self.queue.set_loop_mode(mode);
                self.queue_changed();
            }
            Command::SetShuffle(enabled) => {
                self.queue.set_shuffle(enabled);
                self.queue_changed();
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn play(&mut self, descriptor: SharedDescriptor, reply: Reply) {
        if let Some(loading) = self.loading.as_mut() {
            if loading.descriptor.id() == descriptor.id() {
                tracing::debug!(track = %descriptor.id(), "already loading");
                loading.waiters.push(reply);
                return;
            }
        }
        let index = match self.queue.position_of(descriptor.id()) {
            Some(index) => index,
            None => {
                let after_current = self.queue.cursor().map(|cursor| cursor + 1);
                self.queue.enqueue(descriptor.clone(), after_current)
            }
        };
        self.queue.move_to(index);
        self.queue_changed();
        self.load(descriptor, Trigger::Play, Some(reply), None);
    }

    fn play_all(&mut self, descriptors: Vec<SharedDescriptor>, start: usize, reply: Reply) {
        if start >= descriptors.len() {
            self.ignore(CommandKind::Play, Some(reply));
            return;
        }
        self.queue.clear();
        self.queue.set_shuffle(false);
        for descriptor in descriptors {
            self.queue.enqueue(descriptor, None);
        }
        let target = self.queue.move_to(start);
        self.load_from_queue(target, CommandKind::Play, reply);
    }

    fn load_from_queue(
        &mut self,
        target: Option<SharedDescriptor>,
        command: CommandKind,
        reply: Reply,
    ) {
        match target {
            Some(descriptor) => {
                self.queue_changed();
                self.load(descriptor, Trigger::Play, Some(reply), None);
            }
            None => self.ignore(command, Some(reply)),
        }
    }

    /// Start a new session for `descriptor` and kick off its resolution.
    fn load(
        &mut self,
        descriptor: SharedDescriptor,
        trigger: Trigger,
        reply: Option<Reply>,
        resume_at: Option<u64>,
    ) {
        let Some((previous, next)) = self.machine.fire(trigger) else {
            self.ignore(trigger.command().unwrap_or(CommandKind::Play), reply);
            return;
        };
        self.supersede_loading();
        self.session += 1;
        if previous.has_stream() {
            self.stop_sink();
        }
        // A seek issued while nothing was playing or loading targets this load.
        let requested = if previous == TransportState::Loading || previous.has_stream() {
            None
        } else {
            self.pending_seek.take()
        };
        self.stream = None;
        self.duration_ms = descriptor.metadata().duration_ms;
        self.pending_seek = requested.or(resume_at).map(|position_ms| {
            self.duration_ms
                .map_or(position_ms, |duration| position_ms.min(duration))
        });
        self.elapsed_ms = self.pending_seek.unwrap_or(0);
        self.last_error = None;
        self.progress.reset();

        let same_track = self
            .track
            .as_ref()
            .is_some_and(|track| track.id() == descriptor.id());
        self.track = Some(descriptor.clone());
        if !same_track {
            self.publish(PlayerEvent::TrackChanged {
                track: Some(descriptor.clone()),
            });
        }
        self.publish_state(previous, next);

        tracing::info!(
            track = %descriptor.id(),
            provenance = %descriptor.provenance(),
            session = self.session,
            "loading track"
        );
        self.loading = Some(Loading {
            descriptor: descriptor.clone(),
            waiters: reply.into_iter().collect(),
        });

        let resolution = self.resolver.resolve(descriptor);
        let session = self.session;
        let resolved_tx = self.resolved_tx.clone();
        tokio::spawn(async move {
            let result = resolution.outcome().await;
            let _ = resolved_tx.send(Resolved { session, result });
        });
    }

    fn on_resolved(&mut self, resolved: Resolved) {
        if resolved.session != self.session || self.machine.state() != TransportState::Loading {
            tracing::debug!(session = resolved.session, "dropping stale resolution result");
            return;
        }
        let Some(loading) = self.loading.take() else {
            return;
        };
        let stream = match resolved.result {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(Trigger::ResolveFailed, err, loading.waiters);
                return;
            }
        };
        if let Err(err) = self.start_sink(&stream) {
            self.fail(
                Trigger::SinkFailed,
                EngineError::Sink(format!("{err:#}")),
                loading.waiters,
            );
            return;
        }

        tracing::info!(track = %loading.descriptor.id(), source = %stream.source, "playing");
        self.stream = Some(stream);
        if let Some((previous, next)) = self.machine.fire(Trigger::Started) {
            self.publish_state(previous, next);
        }
        for waiter in loading.waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    fn start_sink(&mut self, stream: &StreamHandle) -> anyhow::Result<()> {
        let notifier = SinkNotifier::new(self.session, self.sink_tx.clone())
            .with_duration_hint(self.duration_ms);
        self.sink.load(stream, notifier).context("load stream")?;
        self.sink
            .set_volume(self.effective_volume())
            .context("apply volume")?;
        self.sink.set_rate(self.rate).context("apply playback rate")?;
        if let Some(position_ms) = self.pending_seek.take() {
            self.sink.seek(position_ms).context("apply pending seek")?;
            self.elapsed_ms = position_ms;
        }
        self.sink.play().context("start playback")?;
        Ok(())
    }

    fn resume(&mut self) {
        let expired = self.machine.state() == TransportState::Paused
            && self.stream.as_ref().is_some_and(StreamHandle::is_expired);
        if expired {
            if let Some(track) = self.track.clone() {
                tracing::info!(track = %track.id(), "stream expired while paused, resolving again");
                self.load(track, Trigger::Reload, None, Some(self.elapsed_ms));
                return;
            }
        }
        self.drive(Trigger::Resume, CommandKind::Resume, |sink| sink.play());
    }

    /// Apply a sink command guarded by a transport transition.
    fn drive(
        &mut self,
        trigger: Trigger,
        command: CommandKind,
        op: impl FnOnce(&mut dyn DeviceSink) -> anyhow::Result<()>,
    ) {
        if !self.machine.allows(trigger) {
            self.ignore(command, None);
            return;
        }
        if let Err(err) = op(self.sink.as_mut()) {
            self.sink_failed(err);
            return;
        }
        if let Some((previous, next)) = self.machine.fire(trigger) {
            self.publish_state(previous, next);
        }
    }

    fn stop(&mut self) {
        let previous = self.machine.state();
        self.resolver.cancel_pending();
        self.supersede_loading();
        self.session += 1;
        if previous.has_stream() {
            self.stop_sink();
        }
        self.stream = None;
        self.elapsed_ms = 0;
        self.duration_ms = None;
        self.pending_seek = None;
        self.last_error = None;
        self.progress.reset();

        if let Some((previous, next)) = self.machine.fire(Trigger::Stop) {
            self.publish_state(previous, next);
        }
        if self.track.take().is_some() {
            tracing::info!("stopped");
            self.publish(PlayerEvent::TrackChanged { track: None });
        }
    }

    fn seek(&mut self, position_ms: u64) {
        let state = self.machine.state();
        if matches!(
            state,
            TransportState::Idle | TransportState::Ended | TransportState::Error
        ) {
            // Clamped against the next track's duration once it loads.
            tracing::debug!(position_ms, %state, "seek kept for the next load");
            self.pending_seek = Some(position_ms);
            return;
        }
        let position_ms = self
            .duration_ms
            .map_or(position_ms, |duration| position_ms.min(duration));
        if state.has_stream() {
            if let Err(err) = self.sink.seek(position_ms) {
                self.sink_failed(err.context("seek"));
                return;
            }
            self.elapsed_ms = position_ms;
            let event = self
                .progress
                .force(Instant::now(), position_ms, self.duration_ms);
            self.events.publish(&event);
        } else {
            tracing::debug!(position_ms, "seek deferred until playback starts");
            self.pending_seek = Some(position_ms);
            self.elapsed_ms = position_ms;
        }
    }

    fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            tracing::warn!(volume, "ignoring non-finite volume");
            self.ignore(CommandKind::SetVolume, None);
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        self.volume_changed();
    }

    fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            self.muted = muted;
            self.volume_changed();
        }
    }

    /// Publish the new level and apply it now if a stream is loaded; otherwise it is applied
    /// when the next stream starts.
    fn volume_changed(&mut self) {
        self.publish(PlayerEvent::VolumeChanged {
            volume: self.volume,
            muted: self.muted,
        });
        if self.machine.state().has_stream() {
            if let Err(err) = self.sink.set_volume(self.effective_volume()) {
                self.sink_failed(err.context("set volume"));
            }
        }
    }

    fn set_rate(&mut self, rate: f32) {
        if !rate.is_finite() {
            tracing::warn!(rate, "ignoring non-finite playback rate");
            self.ignore(CommandKind::SetRate, None);
            return;
        }
        self.rate = rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
        self.publish(PlayerEvent::RateChanged { rate: self.rate });
        if self.machine.state().has_stream() {
            if let Err(err) = self.sink.set_rate(self.rate) {
                self.sink_failed(err.context("set playback rate"));
            }
        }
    }

    fn retry(&mut self, reply: Reply) {
        match self.track.clone() {
            Some(track) if self.machine.state() == TransportState::Error => {
                let resume_at = Some(self.elapsed_ms).filter(|&ms| ms > 0);
                self.load(track, Trigger::Retry, Some(reply), resume_at);
            }
            _ => self.ignore(CommandKind::Retry, Some(reply)),
        }
    }

    fn previous(&mut self, reply: Reply) {
        let has_stream = self.machine.state().has_stream();
        if has_stream && Duration::from_millis(self.elapsed_ms) > self.config.previous_restart() {
            self.seek(0);
            let _ = reply.send(Ok(()));
            return;
        }
        match self.queue.skip_previous() {
            Some(descriptor) => {
                self.queue_changed();
                self.load(descriptor, Trigger::Play, Some(reply), None);
            }
            None if has_stream => {
                self.seek(0);
                let _ = reply.send(Ok(()));
            }
            None => self.ignore(CommandKind::Previous, Some(reply)),
        }
    }

    fn on_sink(&mut self, signal: SinkSignal) {
        if signal.session != self.session {
            tracing::trace!(session = signal.session, "dropping stale sink callback");
            return;
        }
        match signal.event {
            SinkEvent::Position(elapsed_ms) => {
                if !self.machine.state().has_stream() {
                    return;
                }
                self.elapsed_ms = elapsed_ms;
                if let Some(event) = self
                    .progress
                    .offer(Instant::now(), elapsed_ms, self.duration_ms)
                {
                    self.events.publish(&event);
                }
            }
            SinkEvent::Duration(duration_ms) => self.duration_ms = Some(duration_ms),
            SinkEvent::Buffering(true) => self.sink_transition(Trigger::Underrun),
            SinkEvent::Buffering(false) => self.sink_transition(Trigger::Recovered),
            SinkEvent::Ended => self.track_ended(),
            SinkEvent::Error(reason) => {
                let waiters = self
                    .loading
                    .take()
                    .map(|loading| loading.waiters)
                    .unwrap_or_default();
                self.fail(Trigger::SinkFailed, EngineError::Sink(reason), waiters);
            }
        }
    }

    fn sink_transition(&mut self, trigger: Trigger) {
        match self.machine.fire(trigger) {
            Some((previous, next)) => self.publish_state(previous, next),
            None => tracing::debug!(?trigger, state = %self.machine.state(), "sink event has no transition"),
        }
    }

    fn track_ended(&mut self) {
        let Some((previous, next)) = self.machine.fire(Trigger::TrackEnded) else {
            tracing::debug!(state = %self.machine.state(), "ignoring end of track");
            return;
        };
        if let Some(duration_ms) = self.duration_ms {
            self.elapsed_ms = duration_ms;
        }
        self.publish_state(previous, next);

        match self.queue.next() {
            Some(descriptor) => {
                self.queue_changed();
                self.load(descriptor, Trigger::Advance, None, None);
            }
            None => {
                tracing::info!("queue finished");
                self.session += 1;
                self.stop_sink();
                self.stream = None;
                self.elapsed_ms = 0;
                self.duration_ms = None;
                self.progress.reset();
                if let Some((previous, next)) = self.machine.fire(Trigger::Exhausted) {
                    self.publish_state(previous, next);
                }
                if self.track.take().is_some() {
                    self.publish(PlayerEvent::TrackChanged { track: None });
                }
            }
        }
    }

    fn sink_failed(&mut self, err: anyhow::Error) {
        let waiters = self
            .loading
            .take()
            .map(|loading| loading.waiters)
            .unwrap_or_default();
        self.fail(Trigger::SinkFailed, EngineError::Sink(format!("{err:#}")), waiters);
    }

    fn fail(&mut self, trigger: Trigger, err: EngineError, waiters: Vec<Reply>) {
        if let Some((previous, next)) = self.machine.fire(trigger) {
            tracing::warn!(
                track = self.track.as_ref().map(|track| track.id()),
                error = %err,
                "playback failed"
            );
            if trigger == Trigger::SinkFailed {
                self.stop_sink();
            }
            self.session += 1;
            self.stream = None;
            self.pending_seek = None;
            self.progress.reset();
            self.last_error = Some(err.clone());
            self.publish_state(previous, next);
            self.publish(PlayerEvent::Error { error: err.info() });
        }
        for waiter in waiters {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    fn ignore(&mut self, command: CommandKind, reply: Option<Reply>) {
        let state = self.machine.state();
        tracing::debug!(%command, %state, "command ignored");
        self.publish(PlayerEvent::CommandIgnored { command, state });
        if let Some(reply) = reply {
            let _ = reply.send(Err(EngineError::CommandIgnored { command, state }));
        }
    }

    fn supersede_loading(&mut self) {
        if let Some(loading) = self.loading.take() {
            tracing::debug!(track = %loading.descriptor.id(), "load superseded");
            for waiter in loading.waiters {
                let _ = waiter.send(Err(EngineError::Superseded));
            }
        }
    }

    fn stop_sink(&mut self) {
        if let Err(err) = self.sink.stop() {
            tracing::warn!(error = %format!("{err:#}"), "sink stop failed");
        }
    }

    fn effective_volume(&self) -> f32 {
        if self.muted { 0.0 } else { self.volume }
    }

    fn queue_changed(&mut self) {
        self.publish(PlayerEvent::QueueChanged {
            queue: self.queue.snapshot(),
        });
    }

    fn publish_state(&mut self, previous: TransportState, state: TransportState) {
        if previous != state {
            tracing::debug!(%previous, %state, "transport state changed");
            self.publish(PlayerEvent::StateChanged { previous, state });
        }
    }

    /// Publish a discrete event, flushing pending progress first.
    fn publish(&mut self, event: PlayerEvent) {
        self.flush_progress();
        self.events.publish(&event);
    }

    fn flush_progress(&mut self) {
        if let Some(event) = self.progress.flush(Instant::now()) {
            self.events.publish(&event);
        }
    }

    fn snapshot(&self) -> PlayerSnapshot {
        let state = self.machine.state();
        PlayerSnapshot {
            state,
            track: self.track.clone(),
            stream: self.stream.clone(),
            elapsed_ms: self.elapsed_ms,
            duration_ms: self.duration_ms,
            volume: self.volume,
            muted: self.muted,
            rate: self.rate,
            last_error: self
                .last_error
                .as_ref()
                .filter(|_| state == TransportState::Error)
                .map(EngineError::info),
            queue: self.queue.snapshot(),
        }
    }
}
