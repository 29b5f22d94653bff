use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How the stream cache bounds itself. The two limits are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CacheLimit {
    Unbounded,
    MaxBytes(u64),
    MaxItems(usize),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Paths
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub library_dir: Option<PathBuf>,
    pub library_snapshot: String,

    // Playback
    pub default_volume: f32,
    pub max_queue_size: usize,

    // Cache
    pub cache_limit: CacheLimit,

    // Search
    pub search: SearchSettings,

    // Voice lifecycle
    pub voice: VoiceSettings,

    // Decoder
    pub decoder: DecoderSettings,

    pub analytics_webhook: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchSettings {
    /// Top score a cascade step must reach to be accepted.
    pub min_score: f64,
    /// Candidates under this score are dropped by the fuzzy filter.
    pub filter_floor: f64,
    /// Results within this many points of the top make a query "wide".
    pub wide_delta: f64,
    pub remote_min_similarity: f64,
    pub deprioritized_terms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoiceSettings {
    pub idle_disconnect: Duration,
    pub ready_timeout: Duration,
    pub rejoin_backoff: Duration,
    pub moved_grace: Duration,
    pub max_rejoin_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecoderSettings {
    pub program: String,
    /// Argument template; `{url}` and `{rate}` are substituted per track.
    pub args: Vec<String>,
    pub rate_limit: String,
    pub first_byte_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let cache_limit = match (env_parse::<u64>("CACHE_MAX_BYTES")?, env_parse::<usize>("CACHE_MAX_ITEMS")?) {
            (Some(_), Some(_)) => {
                anyhow::bail!("CACHE_MAX_BYTES and CACHE_MAX_ITEMS are mutually exclusive")
            }
            (Some(bytes), None) => CacheLimit::MaxBytes(bytes),
            (None, Some(items)) => CacheLimit::MaxItems(items),
            (None, None) => CacheLimit::Unbounded,
        };

        let config = Self {
            data_dir: env_string("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            cache_dir: env_string("CACHE_DIR").map(PathBuf::from).unwrap_or(defaults.cache_dir),
            library_dir: env_string("LIBRARY_DIR").map(PathBuf::from),
            library_snapshot: env_string("LIBRARY_SNAPSHOT").unwrap_or(defaults.library_snapshot),

            default_volume: env_parse("DEFAULT_VOLUME")?.unwrap_or(defaults.default_volume),
            max_queue_size: env_parse("MAX_QUEUE_SIZE")?.unwrap_or(defaults.max_queue_size),

            cache_limit,

            search: SearchSettings {
                min_score: env_parse("SEARCH_MIN_SCORE")?.unwrap_or(defaults.search.min_score),
                filter_floor: env_parse("SEARCH_FILTER_FLOOR")?.unwrap_or(defaults.search.filter_floor),
                wide_delta: env_parse("SEARCH_WIDE_DELTA")?.unwrap_or(defaults.search.wide_delta),
                remote_min_similarity: env_parse("SEARCH_REMOTE_MIN_SIMILARITY")?
                    .unwrap_or(defaults.search.remote_min_similarity),
                deprioritized_terms: env_string("SEARCH_DEPRIORITIZED")
                    .map(|raw| {
                        raw.split(',')
                            .map(|t| t.trim().to_lowercase())
                            .filter(|t| !t.is_empty())
                            .collect()
                    })
                    .unwrap_or(defaults.search.deprioritized_terms),
            },

            voice: VoiceSettings {
                idle_disconnect: env_duration("IDLE_DISCONNECT")?.unwrap_or(defaults.voice.idle_disconnect),
                ready_timeout: env_duration("READY_TIMEOUT")?.unwrap_or(defaults.voice.ready_timeout),
                rejoin_backoff: env_duration("REJOIN_BACKOFF")?.unwrap_or(defaults.voice.rejoin_backoff),
                moved_grace: env_duration("MOVED_GRACE")?.unwrap_or(defaults.voice.moved_grace),
                max_rejoin_attempts: env_parse("MAX_REJOIN_ATTEMPTS")?
                    .unwrap_or(defaults.voice.max_rejoin_attempts),
            },

            decoder: DecoderSettings {
                program: env_string("DECODER_PROGRAM").unwrap_or(defaults.decoder.program),
                args: defaults.decoder.args,
                rate_limit: env_string("DECODER_RATE_LIMIT").unwrap_or(defaults.decoder.rate_limit),
                first_byte_timeout: env_duration("FIRST_BYTE_TIMEOUT")?
                    .unwrap_or(defaults.decoder.first_byte_timeout),
            },

            analytics_webhook: env_string("ANALYTICS_WEBHOOK"),
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.cache_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Queue size must be > 0
    /// - A size or item cache limit must be non-zero when set
    /// - Search thresholds must be ordered (`filter_floor <= min_score`)
    pub fn validate(&self) -> Result<()> {
        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        match self.cache_limit {
            CacheLimit::MaxBytes(0) => anyhow::bail!("CACHE_MAX_BYTES must be greater than 0"),
            CacheLimit::MaxItems(0) => anyhow::bail!("CACHE_MAX_ITEMS must be greater than 0"),
            _ => {}
        }

        if !(0.0..=100.0).contains(&self.search.min_score) {
            anyhow::bail!("Search min score must be within 0..=100, got: {}", self.search.min_score);
        }

        if self.search.filter_floor > self.search.min_score {
            anyhow::bail!(
                "Search filter floor ({}) cannot exceed the min score ({})",
                self.search.filter_floor,
                self.search.min_score
            );
        }

        if self.search.wide_delta < 0.0 {
            anyhow::bail!("Wide-match delta cannot be negative");
        }

        if self.decoder.program.trim().is_empty() {
            anyhow::bail!("Decoder program cannot be empty");
        }

        Ok(())
    }

    /// Returns a one-glance summary for startup logging.
    pub fn summary(&self) -> String {
        let cache = match self.cache_limit {
            CacheLimit::Unbounded => "unbounded".to_string(),
            CacheLimit::MaxBytes(bytes) => format!("{} MiB", bytes / (1024 * 1024)),
            CacheLimit::MaxItems(items) => format!("{} items", items),
        };

        format!(
            "Config Summary:\n  \
            Paths: data={} cache={} library={}\n  \
            Audio: {}% vol, {} queue max\n  \
            Cache: {}\n  \
            Search: min={} floor={} delta={}\n  \
            Voice: idle={} ready={} rejoin={}x{}",
            self.data_dir.display(),
            self.cache_dir.display(),
            self.library_dir
                .as_ref()
                .map_or("none".to_string(), |p| p.display().to_string()),
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            cache,
            self.search.min_score,
            self.search.filter_floor,
            self.search.wide_delta,
            humantime::format_duration(self.voice.idle_disconnect),
            humantime::format_duration(self.voice.ready_timeout),
            self.voice.max_rejoin_attempts,
            humantime::format_duration(self.voice.rejoin_backoff),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "/app/data".into(),
            cache_dir: "/app/cache".into(),
            library_dir: None,
            library_snapshot: "library".to_string(),

            default_volume: 0.5,
            max_queue_size: 1000,

            cache_limit: CacheLimit::Unbounded,

            search: SearchSettings::default(),
            voice: VoiceSettings::default(),
            decoder: DecoderSettings::default(),

            analytics_webhook: None,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            min_score: 70.0,
            filter_floor: 40.0,
            wide_delta: 5.0,
            remote_min_similarity: 35.0,
            deprioritized_terms: ["instrumental", "inst.", "live", "remix", "karaoke", "acoustic"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            idle_disconnect: Duration::from_secs(5 * 60),
            ready_timeout: Duration::from_secs(20),
            rejoin_backoff: Duration::from_secs(5),
            moved_grace: Duration::from_secs(5),
            max_rejoin_attempts: 5,
        }
    }
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            args: [
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                "-f",
                "bestaudio[ext=webm]/bestaudio/best",
                "--limit-rate",
                "{rate}",
                "-o",
                "-",
                "{url}",
            ]
            .iter()
            .map(|a| a.to_string())
            .collect(),
            rate_limit: "100K".to_string(),
            first_byte_timeout: Duration::from_secs(15),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(key)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("invalid value for {key}: {raw}")))
        .transpose()
}

fn env_duration(key: &str) -> Result<Option<Duration>> {
    env_string(key)
        .map(|raw| humantime::parse_duration(raw.trim()).with_context(|| format!("invalid duration for {key}: {raw}")))
        .transpose()
}
