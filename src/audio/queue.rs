use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::error::QueueError;
use crate::sources::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// "Play next" requests, always served first.
    Explicit,
    Passive,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub track: Track,
    pub queued_by: UserId,
    pub lane: Lane,
}

/// Pending tracks for one guild, split into an explicit and a passive lane.
#[derive(Debug)]
pub struct TrackQueue {
    explicit: VecDeque<QueueEntry>,
    passive: VecDeque<QueueEntry>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            explicit: VecDeque::new(),
            passive: VecDeque::new(),
            max_size,
        }
    }

    fn ensure_room(&self) -> Result<(), QueueError> {
        if self.len() >= self.max_size {
            return Err(QueueError::Full { max: self.max_size });
        }
        Ok(())
    }

    /// Pushes onto the explicit lane.
    pub fn add_next(&mut self, queued_by: UserId, track: Track) -> Result<(), QueueError> {
        self.ensure_room()?;
        info!("⏫ Queued next: {}", track.title());
        self.explicit.push_back(QueueEntry {
            track,
            queued_by,
            lane: Lane::Explicit,
        });
        Ok(())
    }

    /// Appends to the passive lane.
    pub fn add(&mut self, queued_by: UserId, track: Track) -> Result<(), QueueError> {
        self.ensure_room()?;
        info!("➕ Queued: {}", track.title());
        self.passive.push_back(QueueEntry {
            track,
            queued_by,
            lane: Lane::Passive,
        });
        Ok(())
    }

    /// Appends as many tracks as fit; returns how many were queued.
    pub fn add_many(&mut self, queued_by: UserId, tracks: Vec<Track>) -> usize {
        let available = self.max_size.saturating_sub(self.len());
        let to_add = tracks.len().min(available);

        self.passive.extend(tracks.into_iter().take(to_add).map(|track| QueueEntry {
            track,
            queued_by,
            lane: Lane::Passive,
        }));

        info!("➕ Queued {} tracks", to_add);
        to_add
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.explicit.pop_front().or_else(|| self.passive.pop_front());
        if let Some(ref entry) = entry {
            debug!("➡️ Next up ({:?}): {}", entry.lane, entry.track.title());
        }
        entry
    }

    /// The first `depth` entries in serving order, without removing them.
    pub fn peek_deep(&self, depth: usize) -> Vec<&QueueEntry> {
        self.iter().take(depth).collect()
    }

    /// Drops `count` entries, explicit lane first.
    pub fn skip(&mut self, count: usize) -> usize {
        let from_explicit = count.min(self.explicit.len());
        self.explicit.drain(..from_explicit);

        let from_passive = (count - from_explicit).min(self.passive.len());
        self.passive.drain(..from_passive);

        let skipped = from_explicit + from_passive;
        if skipped > 0 {
            debug!("⏭️ Skipped {} queued tracks", skipped);
        }
        skipped
    }

    /// Randomizes each lane on its own; lanes are never merged.
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.explicit.make_contiguous().shuffle(&mut rng);
        self.passive.make_contiguous().shuffle(&mut rng);
        info!("🔀 Queue shuffled ({} tracks)", self.len());
    }

    pub fn clear(&mut self) {
        let count = self.len();
        self.explicit.clear();
        self.passive.clear();
        info!("🗑️ Queue cleared ({} tracks)", count);
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.explicit.iter().chain(self.passive.iter())
    }

    pub fn len(&self) -> usize {
        self.explicit.len() + self.passive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty() && self.passive.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.iter().map(|entry| entry.track.duration()).sum()
    }
}
