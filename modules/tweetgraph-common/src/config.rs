use std::env;
use std::str::FromStr;

use tracing::info;

use crate::error::TweetGraphError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // Ingestion
    /// JSONL file of stream payloads, `-` for stdin.
    pub input: String,
    pub max_events: Option<u64>,
    pub retry_delay_ms: u64,
    pub txn_timeout_secs: Option<u64>,
    pub progress_interval: u64,
    pub dead_letter_path: Option<String>,

    // Stream filter (passed through to the source)
    pub stream_filter: StreamFilter,
}

/// Filter parameters for the stream source: keyword track list and/or a
/// geographic bounding box.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFilter {
    pub track: Vec<String>,
    pub locations: Option<BoundingBox>,
}

impl StreamFilter {
    pub fn is_empty(&self) -> bool {
        self.track.is_empty() && self.locations.is_none()
    }
}

/// `west,south,east,north` in degrees, as the streaming API takes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn contains(&self, lng: f64, lat: f64) -> bool {
        lng >= self.west && lng <= self.east && lat >= self.south && lat <= self.north
    }
}

impl FromStr for BoundingBox {
    type Err = TweetGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TweetGraphError::Config(format!("STREAM_LOCATIONS: {e}")))?;
        match parts.as_slice() {
            [west, south, east, north] if west < east && south < north => Ok(Self {
                west: *west,
                south: *south,
                east: *east,
                north: *north,
            }),
            _ => Err(TweetGraphError::Config(
                "STREAM_LOCATIONS must be west,south,east,north".to_string(),
            )),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, TweetGraphError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TweetGraphError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| TweetGraphError::Config(format!("{key} environment variable is required")))
        };

        let stream_filter = StreamFilter {
            track: lookup("STREAM_TRACK")
                .map(|v| {
                    v.split(',')
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            locations: lookup("STREAM_LOCATIONS")
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.parse())
                .transpose()?,
        };

        Ok(Self {
            neo4j_uri: required("NEO4J_URI")?,
            neo4j_user: required("NEO4J_USER")?,
            neo4j_password: required("NEO4J_PASSWORD")?,
            input: lookup("INGEST_INPUT").unwrap_or_else(|| "-".to_string()),
            max_events: parse_opt(&lookup, "INGEST_MAX_EVENTS")?,
            retry_delay_ms: parse_opt(&lookup, "INGEST_RETRY_DELAY_MS")?.unwrap_or(500),
            txn_timeout_secs: parse_opt(&lookup, "INGEST_TXN_TIMEOUT_SECS")?,
            progress_interval: parse_opt(&lookup, "INGEST_PROGRESS_INTERVAL")?.unwrap_or(100),
            dead_letter_path: lookup("INGEST_DEAD_LETTER_PATH").filter(|v| !v.is_empty()),
            stream_filter,
        })
    }

    /// Log the effective configuration, without credentials.
    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = self.neo4j_uri.as_str(),
            neo4j_user = self.neo4j_user.as_str(),
            input = self.input.as_str(),
            max_events = ?self.max_events,
            retry_delay_ms = self.retry_delay_ms,
            txn_timeout_secs = ?self.txn_timeout_secs,
            dead_letter_path = ?self.dead_letter_path,
            track = ?self.stream_filter.track,
            locations = ?self.stream_filter.locations,
            "Configuration loaded"
        );
    }
}

fn parse_opt<F, T>(lookup: &F, key: &str) -> Result<Option<T>, TweetGraphError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| TweetGraphError::Config(format!("{key} must be a number: {e}"))),
    }
}
