use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::pipeline::AudioPipeline;
use super::player::{GuildPlayer, PlayerSettings};
use crate::analytics::AnalyticsSink;
use crate::error::VoiceError;
use crate::voice::ConnectionProvider;

/// Owns every guild's [`GuildPlayer`].
///
/// Players are created on the first join for a guild and drop out of the
/// registry on their own once they are destroyed. Joins for the same guild
/// are serialized, so a guild never ends up with two players.
pub struct PlayerRegistry {
    players: Arc<DashMap<GuildId, Arc<GuildPlayer>>>,
    joining: DashMap<GuildId, Arc<AsyncMutex<()>>>,
    provider: Arc<dyn ConnectionProvider>,
    pipeline: Arc<AudioPipeline>,
    analytics: Arc<dyn AnalyticsSink>,
    settings: PlayerSettings,
}

impl PlayerRegistry {
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        pipeline: Arc<AudioPipeline>,
        analytics: Arc<dyn AnalyticsSink>,
        settings: PlayerSettings,
    ) -> Self {
        Self {
            players: Arc::new(DashMap::new()),
            joining: DashMap::new(),
            provider,
            pipeline,
            analytics,
            settings,
        }
    }

    /// The guild's player, joining `channel` first if there is none.
    pub async fn join(&self, guild: GuildId, channel: ChannelId) -> Result<Arc<GuildPlayer>, VoiceError> {
        if let Some(player) = self.get(guild) {
            return Ok(player);
        }

        let gate = self.joining.entry(guild).or_default().clone();
        let _joining = gate.lock().await;
        if let Some(player) = self.get(guild) {
            return Ok(player);
        }

        let session = self.provider.join(guild, channel).await?;
        let player = GuildPlayer::start(
            guild,
            session,
            self.pipeline.clone(),
            self.analytics.clone(),
            self.settings.clone(),
        );
        self.players.insert(guild, player.clone());
        self.forget_when_closed(&player);

        info!("🎧 {} active players", self.players.len());
        Ok(player)
    }

    fn forget_when_closed(&self, player: &Arc<GuildPlayer>) {
        let players = self.players.clone();
        let closed = player.closed_token();
        let guild = player.guild();
        let weak = Arc::downgrade(player);

        tokio::spawn(async move {
            closed.cancelled().await;
            let removed = players.remove_if(&guild, |_, current| Arc::as_ptr(current) == weak.as_ptr());
            if removed.is_some() {
                debug!("Removed closed player for guild {}", guild);
            }
        });
    }

    pub fn get(&self, guild: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players
            .get(&guild)
            .map(|p| p.value().clone())
            .filter(|p| !p.is_closed())
    }

    /// Destroys the guild's player and drops it from the registry.
    pub async fn remove(&self, guild: GuildId) -> Option<Arc<GuildPlayer>> {
        let (_, player) = self.players.remove(&guild)?;
        player.destroy().await;
        Some(player)
    }

    pub async fn destroy_all(&self) -> usize {
        let players: Vec<Arc<GuildPlayer>> = self.players.iter().map(|p| p.value().clone()).collect();
        self.players.clear();
        for player in &players {
            player.destroy().await;
        }
        info!("👋 Destroyed {} players", players.len());
        players.len()
    }

    /// A member joined the guild's voice channel.
    pub fn member_joined(&self, guild: GuildId) {
        if let Some(player) = self.get(guild) {
            player.member_joined();
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
