#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use guild_audio::analytics::{AnalyticsSink, PlaybackEvent, PlaybackEventKind};
use guild_audio::audio::pipeline::AudioPipeline;
use guild_audio::audio::resource::AudioResource;
use guild_audio::config::DecoderSettings;
use guild_audio::error::VoiceError;
use guild_audio::library::Listing;
use guild_audio::sources::Track;
use guild_audio::voice::{AudioSink, ConnectionProvider, ConnectionState, SinkState, VoiceConnection, VoiceSession};

pub struct FakeConnection {
    state: watch::Sender<ConnectionState>,
    rejoins: AtomicUsize,
    destroys: AtomicUsize,
}

impl FakeConnection {
    pub fn new(initial: ConnectionState) -> Arc<Self> {
        let (state, _) = watch::channel(initial);
        Arc::new(Self {
            state,
            rejoins: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn rejoins(&self) -> usize {
        self.rejoins.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn rejoin(&self) -> Result<(), VoiceError> {
        self.rejoins.fetch_add(1, Ordering::SeqCst);
        self.set(ConnectionState::Connecting);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), VoiceError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.set(ConnectionState::Destroyed);
        Ok(())
    }
}

pub struct FakeSink {
    state: watch::Sender<SinkState>,
    played: Mutex<Vec<String>>,
    stops: AtomicUsize,
    volume: Mutex<f32>,
}

impl FakeSink {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(SinkState::Idle);
        Arc::new(Self {
            state,
            played: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            volume: Mutex::new(1.0),
        })
    }

    pub fn set(&self, state: SinkState) {
        self.state.send_replace(state);
    }

    /// The current track ended on its own.
    pub fn finish(&self) {
        self.set(SinkState::Idle);
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    fn state(&self) -> SinkState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<SinkState> {
        self.state.subscribe()
    }

    async fn play(&self, resource: AudioResource) -> Result<(), VoiceError> {
        self.played.lock().push(resource.track.id().to_string());
        self.set(SinkState::Buffering);
        Ok(())
    }

    fn pause(&self) -> bool {
        if self.state().is_active() {
            self.set(SinkState::Paused);
            return true;
        }
        false
    }

    fn unpause(&self) -> bool {
        if self.state() == SinkState::Paused {
            self.set(SinkState::Playing);
            return true;
        }
        false
    }

    async fn stop(&self, force: bool) -> bool {
        self.stops.fetch_add(1, Ordering::SeqCst);
        match self.state() {
            SinkState::Idle => false,
            SinkState::Paused | SinkState::AutoPaused if !force => false,
            _ => {
                self.set(SinkState::Idle);
                true
            }
        }
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume;
    }
}

/// Hands out a fresh fake connection and sink per join.
#[derive(Default)]
pub struct FakeProvider {
    joins: AtomicUsize,
    delay: Duration,
    sessions: Mutex<Vec<(Arc<FakeConnection>, Arc<FakeSink>)>>,
}

impl FakeProvider {
    /// Each join takes `delay` before the connection is handed out.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn last_connection(&self) -> Option<Arc<FakeConnection>> {
        self.sessions.lock().last().map(|(c, _)| c.clone())
    }
}

#[async_trait]
impl ConnectionProvider for FakeProvider {
    async fn join(&self, _guild: GuildId, _channel: ChannelId) -> Result<VoiceSession, VoiceError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let connection = FakeConnection::new(ConnectionState::Ready);
        let sink = FakeSink::new();
        self.sessions.lock().push((connection.clone(), sink.clone()));
        Ok(VoiceSession { connection, sink })
    }
}

#[derive(Default)]
pub struct RecordingAnalytics {
    events: Mutex<Vec<PlaybackEvent>>,
}

impl RecordingAnalytics {
    pub fn kinds(&self) -> Vec<(String, PlaybackEventKind)> {
        self.events
            .lock()
            .iter()
            .map(|e| (e.track_id.clone(), e.kind))
            .collect()
    }
}

impl AnalyticsSink for RecordingAnalytics {
    fn record(&self, event: PlaybackEvent) {
        self.events.lock().push(event);
    }
}

pub fn user() -> UserId {
    UserId::new(7)
}

pub fn session(connection: &Arc<FakeConnection>, sink: &Arc<FakeSink>) -> VoiceSession {
    VoiceSession {
        connection: connection.clone(),
        sink: sink.clone(),
    }
}

pub fn pipeline() -> Arc<AudioPipeline> {
    Arc::new(AudioPipeline::new(DecoderSettings::default(), None))
}

/// Decoder that takes a while to produce its first byte, then hangs.
pub fn slow_pipeline() -> Arc<AudioPipeline> {
    let settings = DecoderSettings {
        program: "sh".into(),
        args: vec!["-c".into(), "sleep 0.3; printf OggS; exec sleep 30".into()],
        rate_limit: "100K".into(),
        first_byte_timeout: Duration::from_secs(5),
    };
    Arc::new(AudioPipeline::new(settings, None))
}

pub fn remote_track(id: &str) -> Track {
    Track::new(
        Arc::new(Listing::remote(id, id, format!("https://example.com/{id}"))),
        user(),
    )
}

/// A local track with a known length.
pub fn timed_track(dir: &Path, id: &str, secs: u64) -> Track {
    let path = dir.join(format!("{id}.mp3"));
    std::fs::write(&path, b"ID3").unwrap();
    let listing = Listing::local(id, id, path).with_duration(Duration::from_secs(secs));
    Track::new(Arc::new(listing), user())
}

/// A local track backed by a real (empty) file in `dir`.
pub fn local_track(dir: &Path, id: &str) -> Track {
    let path = dir.join(format!("{id}.mp3"));
    std::fs::write(&path, b"ID3").unwrap();
    Track::new(Arc::new(Listing::local(id, id, path)), user())
}

/// A local track whose file does not exist.
pub fn missing_track(dir: &Path, id: &str) -> Track {
    Track::new(Arc::new(Listing::local(id, id, dir.join("gone.mp3"))), user())
}

/// Lets the player's background tasks observe the latest state.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Polls `condition` until it holds, failing the test after a second.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
