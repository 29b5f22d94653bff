//! # Voice Module
//!
//! The seams between a [`GuildPlayer`](crate::audio::player::GuildPlayer) and
//! the voice transport. Connections and sinks publish their state on a
//! `watch` channel; the player subscribes once and reacts to transitions.
//!
//! [`call`] adapts these traits to a Songbird call.

pub mod call;

pub use call::{SongbirdConnection, SongbirdProvider, SongbirdSink};

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::watch;

use crate::audio::resource::AudioResource;
use crate::error::VoiceError;

/// Websocket close code sent when the bot is moved to another channel.
pub const MOVED_CHANNEL_CLOSE_CODE: u16 = 4014;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    WebSocketClosed { code: Option<u16> },
    Other(String),
}

impl DisconnectCause {
    pub fn is_moved_channel(&self) -> bool {
        matches!(
            self,
            Self::WebSocketClosed {
                code: Some(MOVED_CHANNEL_CLOSE_CODE)
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Signalling,
    Connecting,
    Ready,
    Disconnected(DisconnectCause),
    Destroyed,
}

impl ConnectionState {
    /// Still negotiating; the player holds its ready lock while in here.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Signalling | Self::Connecting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Buffering,
    Playing,
    Paused,
    AutoPaused,
}

impl SinkState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Buffering | Self::Playing)
    }
}

#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn state(&self) -> ConnectionState;

    fn subscribe(&self) -> watch::Receiver<ConnectionState>;

    async fn rejoin(&self) -> Result<(), VoiceError>;

    async fn destroy(&self) -> Result<(), VoiceError>;
}

#[async_trait]
pub trait AudioSink: Send + Sync {
    fn state(&self) -> SinkState;

    fn subscribe(&self) -> watch::Receiver<SinkState>;

    /// Replaces whatever is playing with `resource`.
    async fn play(&self, resource: AudioResource) -> Result<(), VoiceError>;

    fn pause(&self) -> bool;

    fn unpause(&self) -> bool;

    /// Returns false when nothing was playing. `force` also stops a paused track.
    async fn stop(&self, force: bool) -> bool;

    fn set_volume(&self, volume: f32);
}

/// A joined voice channel: the connection plus the sink that plays into it.
#[derive(Clone)]
pub struct VoiceSession {
    pub connection: Arc<dyn VoiceConnection>,
    pub sink: Arc<dyn AudioSink>,
}

#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn join(&self, guild: GuildId, channel: ChannelId) -> Result<VoiceSession, VoiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_4014_counts_as_moved() {
        assert!(DisconnectCause::WebSocketClosed { code: Some(4014) }.is_moved_channel());
        assert!(!DisconnectCause::WebSocketClosed { code: Some(4006) }.is_moved_channel());
        assert!(!DisconnectCause::WebSocketClosed { code: None }.is_moved_channel());
        assert!(!DisconnectCause::Other("timed out".into()).is_moved_channel());
    }

    #[test]
    fn active_sink_states() {
        assert!(SinkState::Buffering.is_active());
        assert!(SinkState::Playing.is_active());
        assert!(!SinkState::Idle.is_active());
        assert!(!SinkState::AutoPaused.is_active());
        assert!(ConnectionState::Signalling.is_pending());
        assert!(!ConnectionState::Ready.is_pending());
    }
}
