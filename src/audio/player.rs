use parking_lot::Mutex;
use serenity::model::id::{GuildId, UserId};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pipeline::AudioPipeline;
use super::queue::{QueueEntry, TrackQueue};
use super::resource::DecodeHandle;
use crate::analytics::{AnalyticsSink, PlaybackEvent, PlaybackEventKind};
use crate::config::{Config, VoiceSettings};
use crate::error::QueueError;
use crate::sources::{PlaylistItem, Track};
use crate::voice::{AudioSink, ConnectionState, DisconnectCause, SinkState, VoiceConnection, VoiceSession};

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub volume: f32,
    pub max_queue_size: usize,
    pub voice: VoiceSettings,
}

impl PlayerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            volume: config.default_volume,
            max_queue_size: config.max_queue_size,
            voice: config.voice.clone(),
        }
    }
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued_count: usize,
    pub estimated_remaining_secs: u64,
}

struct NowPlaying {
    track: Track,
    queued_by: UserId,
    started: Instant,
    decode: Option<DecodeHandle>,
}

/// Held while `process_queue` runs; the flag is released on every exit path.
struct QueueLockGuard<'a>(&'a AtomicBool);

impl<'a> QueueLockGuard<'a> {
    fn acquire(flag: &'a AtomicBool, force: bool) -> Option<Self> {
        let was_locked = flag.swap(true, Ordering::AcqRel);
        if was_locked && !force {
            return None;
        }
        Some(Self(flag))
    }
}

impl Drop for QueueLockGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Playback for one guild: a [`TrackQueue`], a voice connection and an audio
/// sink, driven by the connection and sink state transitions.
///
/// Only `process_queue` moves tracks from the queue to the sink, and at most
/// one run is in flight at a time. The background tasks watching state hold a
/// weak reference, so dropping the last `Arc` stops them.
pub struct GuildPlayer {
    guild: GuildId,
    connection: Arc<dyn VoiceConnection>,
    sink: Arc<dyn AudioSink>,
    pipeline: Arc<AudioPipeline>,
    analytics: Arc<dyn AnalyticsSink>,
    settings: PlayerSettings,

    queue: Mutex<TrackQueue>,
    current: Mutex<Option<NowPlaying>>,
    volume: Mutex<f32>,

    queue_lock: AtomicBool,
    ready_lock: AtomicBool,
    disconnect_timer: Mutex<Option<JoinHandle<()>>>,
    rejoin_attempts: AtomicU32,
    torn_down: AtomicBool,
    closed: CancellationToken,
}

impl GuildPlayer {
    /// Wraps a joined session and starts watching its state.
    pub fn start(
        guild: GuildId,
        session: VoiceSession,
        pipeline: Arc<AudioPipeline>,
        analytics: Arc<dyn AnalyticsSink>,
        settings: PlayerSettings,
    ) -> Arc<Self> {
        let player = Arc::new(Self {
            guild,
            connection: session.connection,
            sink: session.sink,
            pipeline,
            analytics,
            queue: Mutex::new(TrackQueue::new(settings.max_queue_size)),
            current: Mutex::new(None),
            volume: Mutex::new(settings.volume),
            settings,
            queue_lock: AtomicBool::new(false),
            ready_lock: AtomicBool::new(false),
            disconnect_timer: Mutex::new(None),
            rejoin_attempts: AtomicU32::new(0),
            torn_down: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });

        Self::watch_connection(&player);
        Self::watch_sink(&player);
        info!("🎧 Player started for guild {}", guild);
        player
    }

    fn watch_connection(player: &Arc<Self>) {
        let weak = Arc::downgrade(player);
        let mut rx = player.connection.subscribe();
        let closed = player.closed.clone();
        let mut current = rx.borrow_and_update().clone();

        tokio::spawn(async move {
            if let Some(player) = weak.upgrade() {
                player.on_connection_state(&current).await;
            }

            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    changed = rx.changed() => if changed.is_err() { break },
                }
                let next = rx.borrow_and_update().clone();
                if next == current {
                    continue;
                }
                debug!("🔌 Connection {:?} -> {:?}", current, next);
                current = next;

                let Some(player) = Weak::upgrade(&weak) else { break };
                player.on_connection_state(&current).await;
            }
        });
    }

    fn watch_sink(player: &Arc<Self>) {
        let weak = Arc::downgrade(player);
        let mut rx = player.sink.subscribe();
        let closed = player.closed.clone();
        let mut previous = *rx.borrow_and_update();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    changed = rx.changed() => if changed.is_err() { break },
                }
                let next = *rx.borrow_and_update();
                if next == previous {
                    continue;
                }
                debug!("🔈 Sink {:?} -> {:?}", previous, next);

                let Some(player) = Weak::upgrade(&weak) else { break };
                player.on_sink_state(previous, next).await;
                previous = next;
            }
        });
    }

    async fn on_connection_state(self: &Arc<Self>, state: &ConnectionState) {
        match state {
            ConnectionState::Ready => {
                self.rejoin_attempts.store(0, Ordering::Release);
            }
            ConnectionState::Signalling | ConnectionState::Connecting => self.await_ready().await,
            ConnectionState::Disconnected(cause) => self.handle_disconnect(cause).await,
            ConnectionState::Destroyed => self.teardown().await,
        }
    }

    async fn on_sink_state(self: &Arc<Self>, previous: SinkState, next: SinkState) {
        if self.torn_down.load(Ordering::Acquire) {
            return;
        }
        match next {
            SinkState::Idle => {
                self.start_disconnect_timer();
                self.process_queue(false).await;
            }
            SinkState::Buffering | SinkState::Playing if !previous.is_active() => {
                self.clear_disconnect_timer();
            }
            _ => {}
        }
    }

    /// Destroys the connection if it is still negotiating after the ready timeout.
    async fn await_ready(&self) {
        if self.ready_lock.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut rx = self.connection.subscribe();
        let wait = async { rx.wait_for(|s| !s.is_pending()).await.is_ok() };
        let reached = timeout(self.settings.voice.ready_timeout, wait).await;
        self.ready_lock.store(false, Ordering::Release);

        if reached.is_err() {
            warn!(
                "⏱️ Voice connection in guild {} not ready after {:?}, destroying",
                self.guild, self.settings.voice.ready_timeout
            );
            self.destroy().await;
        }
    }

    async fn handle_disconnect(&self, cause: &DisconnectCause) {
        if cause.is_moved_channel() {
            // Moved to another channel: the driver reconnects by itself.
            let mut rx = self.connection.subscribe();
            let wait = async {
                rx.wait_for(|s| s.is_pending() || *s == ConnectionState::Ready)
                    .await
                    .is_ok()
            };
            match timeout(self.settings.voice.moved_grace, wait).await {
                Ok(true) => debug!("🔀 Voice in guild {} moved channel", self.guild),
                _ => {
                    info!("🔌 Voice in guild {} was not re-established after a move", self.guild);
                    self.teardown().await;
                }
            }
            return;
        }

        loop {
            let attempts = self.rejoin_attempts.load(Ordering::Acquire);
            if attempts >= self.settings.voice.max_rejoin_attempts {
                warn!(
                    "🔌 Giving up on voice in guild {} after {} rejoin attempts",
                    self.guild, attempts
                );
                self.teardown().await;
                return;
            }

            let attempt = attempts + 1;
            self.rejoin_attempts.store(attempt, Ordering::Release);
            let backoff = self.settings.voice.rejoin_backoff * attempt;
            info!(
                "🔄 Rejoining voice in guild {} in {:?} (attempt {})",
                self.guild, backoff, attempt
            );

            tokio::select! {
                _ = self.closed.cancelled() => return,
                _ = sleep(backoff) => {}
            }
            if !matches!(self.connection.state(), ConnectionState::Disconnected(_)) {
                return;
            }

            match self.connection.rejoin().await {
                Ok(()) => return,
                Err(e) => warn!("🔄 Rejoin attempt {} in guild {} failed: {}", attempt, self.guild, e),
            }
        }
    }

    fn start_disconnect_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let idle = self.settings.voice.idle_disconnect;
        let handle = tokio::spawn(async move {
            sleep(idle).await;
            if let Some(player) = weak.upgrade() {
                // Detach our own handle so teardown does not abort this task.
                drop(player.disconnect_timer.lock().take());
                info!("💤 Guild {} idle for {:?}, leaving voice", player.guild, idle);
                player.destroy().await;
            }
        });

        if let Some(previous) = self.disconnect_timer.lock().replace(handle) {
            previous.abort();
        }
    }

    fn clear_disconnect_timer(&self) {
        if let Some(timer) = self.disconnect_timer.lock().take() {
            timer.abort();
            debug!("⏲️ Idle timer cleared for guild {}", self.guild);
        }
    }

    pub fn has_disconnect_timer(&self) -> bool {
        self.disconnect_timer.lock().is_some()
    }

    /// A member joined the voice channel; playback is wanted again.
    pub fn member_joined(&self) {
        self.clear_disconnect_timer();
    }

    /// Plays the next queued track unless a run is already in flight or the
    /// sink is busy; `force` overrides both. Tracks that fail to decode are
    /// skipped. Returns true when a track started.
    pub async fn process_queue(&self, force: bool) -> bool {
        if !force && self.sink.state() != SinkState::Idle {
            return false;
        }
        let Some(_guard) = QueueLockGuard::acquire(&self.queue_lock, force) else {
            return false;
        };

        loop {
            if self.is_torn_down() {
                return false;
            }

            let next = self.queue.lock().pop();
            let Some(QueueEntry { track, queued_by, .. }) = next else {
                self.finish_playback().await;
                return false;
            };

            let mut resource = match self.pipeline.materialize(&track).await {
                Ok(resource) => resource,
                Err(e) => {
                    warn!("❌ Could not play '{}', skipping: {}", track.title(), e);
                    continue;
                }
            };

            let decode = resource.take_decode_handle();
            if self.is_torn_down() {
                debug!("Player for guild {} closed while '{}' was loading", self.guild, track.title());
                if let Some(decode) = decode {
                    decode.abort();
                }
                return false;
            }

            self.sink.set_volume(*self.volume.lock());
            if let Err(e) = self.sink.play(resource).await {
                warn!("❌ Sink refused '{}', skipping: {}", track.title(), e);
                if let Some(decode) = decode {
                    decode.abort();
                }
                continue;
            }

            // Teardown flips `torn_down` before it clears `current`, so checking
            // under the lock means either teardown sees this track or we see it.
            let late = {
                let mut current = self.current.lock();
                if self.is_torn_down() {
                    Some(decode)
                } else {
                    *current = Some(NowPlaying {
                        track: track.clone(),
                        queued_by,
                        started: Instant::now(),
                        decode,
                    });
                    None
                }
            };
            if let Some(decode) = late {
                if let Some(decode) = decode {
                    decode.abort();
                }
                self.sink.stop(true).await;
                return false;
            }

            info!("🎵 Now playing in guild {}: {}", self.guild, track.title());
            self.analytics
                .record(PlaybackEvent::new(track.id(), queued_by, PlaybackEventKind::Play));
            return true;
        }
    }

    /// Queue ran dry: drop the current resource and leave the sink idle.
    async fn finish_playback(&self) {
        let finished = self.current.lock().take();
        if let Some(finished) = finished {
            debug!("✅ Finished {}", finished.track.title());
        }
        self.sink.stop(true).await;
    }

    fn take_current(&self, record_skip: bool) -> Option<Track> {
        let current = self.current.lock().take()?;
        if let Some(decode) = &current.decode {
            decode.abort();
        }
        if record_skip {
            self.analytics.record(PlaybackEvent::new(
                current.track.id(),
                current.queued_by,
                PlaybackEventKind::Skip,
            ));
        }
        Some(current.track)
    }

    pub async fn enqueue(&self, user: UserId, track: Track, as_next: bool) -> Result<(), QueueError> {
        let id = track.id().to_string();
        {
            let mut queue = self.queue.lock();
            if as_next {
                queue.add_next(user, track)?;
            } else {
                queue.add(user, track)?;
            }
        }
        self.analytics
            .record(PlaybackEvent::new(id, user, PlaybackEventKind::Queue));
        self.process_queue(false).await;
        Ok(())
    }

    /// Queues as many tracks as fit; returns how many were queued.
    pub async fn enqueue_many(&self, user: UserId, tracks: Vec<Track>) -> usize {
        let ids: Vec<String> = tracks.iter().map(|t| t.id().to_string()).collect();
        let added = self.queue.lock().add_many(user, tracks);
        for id in ids.into_iter().take(added) {
            self.analytics
                .record(PlaybackEvent::new(id, user, PlaybackEventKind::Queue));
        }
        self.process_queue(false).await;
        added
    }

    /// Skips the current track plus `count` queued ones, then plays the next.
    pub async fn skip(&self, count: usize) {
        if let Some(skipped) = self.take_current(true) {
            info!("⏭️ Skipped {} in guild {}", skipped.title(), self.guild);
        }
        self.queue.lock().skip(count);
        self.process_queue(true).await;
    }

    pub fn shuffle(&self) {
        self.queue.lock().shuffle();
    }

    /// Clears both lanes and stops playback; the connection stays up.
    pub async fn stop(&self) {
        self.queue.lock().clear();
        self.take_current(false);
        self.sink.stop(true).await;
        info!("⏹️ Playback stopped in guild {}", self.guild);
    }

    pub fn pause(&self) -> bool {
        self.sink.pause()
    }

    pub fn unpause(&self) -> bool {
        self.sink.unpause()
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 2.0);
        *self.volume.lock() = volume;
        self.sink.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    pub fn now_playing(&self) -> Option<Track> {
        self.current.lock().as_ref().map(|c| c.track.clone())
    }

    /// Upcoming tracks in serving order.
    pub fn peek(&self, depth: usize) -> Vec<Track> {
        self.queue
            .lock()
            .peek_deep(depth)
            .into_iter()
            .map(|entry| entry.track.clone())
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let (queued_count, queued) = {
            let queue = self.queue.lock();
            (queue.len(), queue.total_duration())
        };
        let current_left = self
            .current
            .lock()
            .as_ref()
            .map(|c| c.track.duration().saturating_sub(c.started.elapsed()))
            .unwrap_or(Duration::ZERO);

        QueueStats {
            queued_count,
            estimated_remaining_secs: (queued + current_left).as_secs(),
        }
    }

    /// Current track followed by the queue, for a later replay.
    pub fn export_queue(&self) -> Vec<PlaylistItem> {
        let current = self.current.lock().as_ref().map(|c| c.track.to_playlist_item());
        let queue = self.queue.lock();
        current
            .into_iter()
            .chain(queue.iter().map(|entry| entry.track.to_playlist_item()))
            .collect()
    }

    pub fn guild(&self) -> GuildId {
        self.guild
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn sink_state(&self) -> SinkState {
        self.sink.state()
    }

    pub fn is_processing(&self) -> bool {
        self.queue_lock.load(Ordering::Acquire)
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the player has been torn down.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Leaves voice and releases everything. Does nothing when the connection
    /// is already destroyed or disconnected; returns whether it acted.
    pub async fn destroy(&self) -> bool {
        match self.connection.state() {
            ConnectionState::Destroyed | ConnectionState::Disconnected(_) => {
                debug!("Player for guild {} already disconnected", self.guild);
                false
            }
            _ => {
                self.teardown().await;
                true
            }
        }
    }

    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.queue_lock.store(false, Ordering::Release);
        self.clear_disconnect_timer();
        self.take_current(true);
        self.queue.lock().clear();
        self.sink.stop(true).await;

        if self.connection.state() != ConnectionState::Destroyed {
            if let Err(e) = self.connection.destroy().await {
                warn!("Error destroying voice connection for guild {}: {}", self.guild, e);
            }
        }

        self.closed.cancel();
        info!("👋 Player destroyed for guild {}", self.guild);
    }
}
