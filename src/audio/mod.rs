//! # Audio Module
//!
//! Queueing and playback for each guild.
//!
//! ## Architecture
//!
//! ### [`player`] - Guild Player
//! - Owns one queue, one voice connection and one audio sink
//! - Reacts to connection/sink state: auto-advance, idle disconnect,
//!   ready timeout, rejoin with backoff
//!
//! ### [`queue`] - Track Queue
//! - Explicit ("play next") lane served before the passive lane
//! - Skip, per-lane shuffle, peek without removal
//!
//! ### [`pipeline`] / [`resource`] - Materialization
//! - Local files and cached blobs are opened directly
//! - Remote tracks run the decoder process, tee its output into the
//!   stream cache and expose it as a blocking reader
//!
//! ### [`registry`] - Player Registry
//! - One player per guild, removed once it is destroyed

pub mod pipeline;
pub mod player;
pub mod queue;
pub mod registry;
pub mod resource;

pub use player::{GuildPlayer, PlayerSettings, QueueStats};
pub use queue::{Lane, QueueEntry, TrackQueue};
pub use registry::PlayerRegistry;
pub use resource::{AudioResource, Container, DecodeHandle, ResourceInput};
