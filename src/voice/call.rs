use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::events::context_data::{DisconnectData, DisconnectReason};
use songbird::events::CoreEvent;
use songbird::input::{AudioStream, File as FileInput, Input, LiveInput};
use songbird::model::CloseCode;
use songbird::tracks::TrackHandle;
use songbird::{Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use super::{
    AudioSink, ConnectionProvider, ConnectionState, DisconnectCause, SinkState, VoiceConnection, VoiceSession,
    MOVED_CHANNEL_CLOSE_CODE,
};
use crate::audio::resource::{AudioResource, ResourceInput, StreamReader};
use crate::error::VoiceError;

impl MediaSource for StreamReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

fn to_input(input: ResourceInput) -> Input {
    match input {
        ResourceInput::File(path) => FileInput::new(path).into(),
        ResourceInput::Stream { reader, container } => {
            let mut hint = Hint::new();
            if let Some(ext) = container.extension() {
                hint.with_extension(ext);
            }
            let stream = AudioStream {
                input: Box::new(reader) as Box<dyn MediaSource>,
                hint: Some(hint),
            };
            Input::Live(LiveInput::Raw(stream), None)
        }
    }
}

fn disconnect_cause(data: &DisconnectData<'_>) -> DisconnectCause {
    match &data.reason {
        Some(DisconnectReason::WsClosed(Some(CloseCode::Disconnected))) => DisconnectCause::WebSocketClosed {
            code: Some(MOVED_CHANNEL_CLOSE_CODE),
        },
        Some(DisconnectReason::WsClosed(_)) => DisconnectCause::WebSocketClosed { code: None },
        Some(other) => DisconnectCause::Other(format!("{:?}", other)),
        None => DisconnectCause::Other("unknown".to_string()),
    }
}

/// Publishes a state unless the connection was already destroyed.
fn publish(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        if *current == ConnectionState::Destroyed || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Joins voice channels through a shared Songbird manager.
pub struct SongbirdProvider {
    manager: Arc<Songbird>,
}

impl SongbirdProvider {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ConnectionProvider for SongbirdProvider {
    async fn join(&self, guild: GuildId, channel: ChannelId) -> Result<VoiceSession, VoiceError> {
        let call = self.manager.get_or_insert(guild);
        let state = Arc::new(watch::channel(ConnectionState::Signalling).0);

        {
            let mut handler = call.lock().await;
            for event in [CoreEvent::DriverConnect, CoreEvent::DriverReconnect, CoreEvent::DriverDisconnect] {
                handler.add_global_event(
                    Event::Core(event),
                    ConnectionEvents {
                        guild,
                        state: state.clone(),
                    },
                );
            }
        }

        publish(&state, ConnectionState::Connecting);
        if let Err(e) = self.manager.join(guild, channel).await {
            error!("Error joining voice channel in guild {}: {:?}", guild, e);
            publish(&state, ConnectionState::Disconnected(DisconnectCause::Other(e.to_string())));
            return Err(VoiceError::Join(e.to_string()));
        }
        publish(&state, ConnectionState::Ready);
        info!("🔊 Connected to voice in guild {}", guild);

        let connection = SongbirdConnection {
            guild,
            channel,
            manager: self.manager.clone(),
            call: call.clone(),
            state,
        };
        Ok(VoiceSession {
            connection: Arc::new(connection),
            sink: Arc::new(SongbirdSink::new(call)),
        })
    }
}

struct ConnectionEvents {
    guild: GuildId,
    state: Arc<watch::Sender<ConnectionState>>,
}

#[async_trait]
impl VoiceEventHandler for ConnectionEvents {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let next = match ctx {
            EventContext::DriverConnect(_) | EventContext::DriverReconnect(_) => ConnectionState::Ready,
            EventContext::DriverDisconnect(data) => {
                let cause = disconnect_cause(data);
                warn!("🔌 Voice driver disconnected in guild {}: {:?}", self.guild, cause);
                ConnectionState::Disconnected(cause)
            }
            _ => return None,
        };
        publish(&self.state, next);
        None
    }
}

pub struct SongbirdConnection {
    guild: GuildId,
    channel: ChannelId,
    manager: Arc<Songbird>,
    call: Arc<AsyncMutex<Call>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn rejoin(&self) -> Result<(), VoiceError> {
        if self.state() == ConnectionState::Destroyed {
            return Err(VoiceError::Destroyed);
        }

        info!("🔄 Rejoining voice channel {} in guild {}", self.channel, self.guild);
        publish(&self.state, ConnectionState::Signalling);
        let join = {
            let mut handler = self.call.lock().await;
            handler
                .join(self.channel)
                .await
                .map_err(|e| VoiceError::Join(e.to_string()))?
        };
        publish(&self.state, ConnectionState::Connecting);
        join.await.map_err(|e| VoiceError::Driver(e.to_string()))?;
        publish(&self.state, ConnectionState::Ready);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), VoiceError> {
        if self.state() == ConnectionState::Destroyed {
            return Ok(());
        }
        let result = self.manager.remove(self.guild).await;
        self.state.send_replace(ConnectionState::Destroyed);
        info!("👋 Left voice in guild {}", self.guild);
        result.map_err(|e| VoiceError::Driver(e.to_string()))
    }
}

/// Plays resources into a Songbird call, one track at a time.
pub struct SongbirdSink {
    call: Arc<AsyncMutex<Call>>,
    state: Arc<watch::Sender<SinkState>>,
    current: Mutex<Option<TrackHandle>>,
    generation: Arc<AtomicU64>,
    volume: Mutex<f32>,
}

impl SongbirdSink {
    pub fn new(call: Arc<AsyncMutex<Call>>) -> Self {
        Self {
            call,
            state: Arc::new(watch::channel(SinkState::Idle).0),
            current: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            volume: Mutex::new(1.0),
        }
    }
}

/// Maps one track's events to sink state; events from replaced tracks are ignored.
struct TrackStateEvents {
    generation: u64,
    latest: Arc<AtomicU64>,
    state: Arc<watch::Sender<SinkState>>,
}

#[async_trait]
impl VoiceEventHandler for TrackStateEvents {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if self.latest.load(Ordering::Acquire) != self.generation {
            return Some(Event::Cancel);
        }
        let EventContext::Track(tracks) = ctx else {
            return None;
        };
        for (state, _handle) in tracks.iter() {
            let next = match state.playing {
                songbird::tracks::PlayMode::Play => SinkState::Playing,
                songbird::tracks::PlayMode::Pause => SinkState::Paused,
                songbird::tracks::PlayMode::Errored(ref e) => {
                    error!("❌ Track error: {:?}", e);
                    SinkState::Idle
                }
                _ => SinkState::Idle,
            };
            self.state.send_if_modified(|current| {
                let changed = *current != next;
                *current = next;
                changed
            });
        }
        None
    }
}

#[async_trait]
impl AudioSink for SongbirdSink {
    fn state(&self) -> SinkState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<SinkState> {
        self.state.subscribe()
    }

    async fn play(&self, resource: AudioResource) -> Result<(), VoiceError> {
        let title = resource.track.title().to_string();
        let input = to_input(resource.input);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.send_replace(SinkState::Buffering);

        let handle = self.call.lock().await.play_only_input(input);
        let _ = handle.set_volume(*self.volume.lock());

        for event in [TrackEvent::Play, TrackEvent::Pause, TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackStateEvents {
                        generation,
                        latest: self.generation.clone(),
                        state: self.state.clone(),
                    },
                )
                .map_err(|e| VoiceError::Driver(format!("Error adding track event handler: {}", e)))?;
        }

        debug!("▶️ Handed '{}' to the voice driver", title);
        *self.current.lock() = Some(handle);
        Ok(())
    }

    fn pause(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(handle) => handle.pause().is_ok(),
            None => false,
        }
    }

    fn unpause(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(handle) => handle.play().is_ok(),
            None => false,
        }
    }

    async fn stop(&self, force: bool) -> bool {
        if !force && self.state() == SinkState::Paused {
            return false;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        let stopped = self.current.lock().take().is_some();
        self.call.lock().await.stop();
        self.state.send_if_modified(|current| {
            let changed = *current != SinkState::Idle;
            *current = SinkState::Idle;
            changed
        });
        stopped
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume;
        if let Some(handle) = self.current.lock().as_ref() {
            let _ = handle.set_volume(volume);
        }
    }
}
