//! # Guild Audio
//!
//! Per-guild audio playback engine for a Discord music bot.
//!
//! Given a free-text play request the engine resolves it to a track
//! ([`search::QueryResolver`]), queues it ([`audio::queue::TrackQueue`]),
//! materializes it into a playable stream ([`audio::pipeline::AudioPipeline`])
//! and drives a voice connection through its lifecycle
//! ([`audio::player::GuildPlayer`]). Remote streams are kept in a bounded disk
//! cache ([`cache::StreamCache`]) so repeated plays skip the download.
//!
//! The chat transport (commands, embeds, permissions) lives outside this crate
//! and talks to it through [`audio::registry::PlayerRegistry`].

pub mod analytics;
pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod library;
pub mod search;
pub mod sources;
pub mod storage;
pub mod voice;

pub use config::Config;
