use crate::blob_store::{BlobStore, FsBlobStore};
use crate::normalizer::DEFAULT_CHUNK_SIZE;
use crate::TrackerError;
use chrono::Duration;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_STALE_MINUTES: i64 = 1440;
pub const DEFAULT_STATE_DIR: &str = "./costtrack_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Prod,
    Dev,
}

impl Environment {
    /// Key prefix for every tracker blob.
    pub fn prefix(&self) -> &'static str {
        match self {
            Environment::Prod => "Tracking",
            Environment::Dev => "DevTracking",
        }
    }
}

impl FromStr for Environment {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("dev") {
            Ok(Environment::Dev)
        } else {
            Ok(Environment::Prod)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub prefix: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub environment: Environment,
    pub state_dir: PathBuf,
    pub s3: Option<S3Settings>,
    pub stale_minutes: i64,
    pub chunk_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Prod,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            s3: None,
            stale_minutes: DEFAULT_STALE_MINUTES,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Result<Self, TrackerError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, TrackerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match var("COSTTRACK_ENVIRONMENT").or_else(|| var("ENVIRONMENT")) {
            Some(env) => env.parse()?,
            None => Environment::Prod,
        };

        let s3 = var("COSTTRACK_S3_BUCKET").map(|bucket| S3Settings {
            bucket,
            region: var("COSTTRACK_S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            prefix: var("COSTTRACK_S3_PREFIX").unwrap_or_default(),
            endpoint: var("COSTTRACK_S3_ENDPOINT"),
        });

        let state_dir = var("COSTTRACK_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

        let stale_minutes = match var("COSTTRACK_STALE_MINUTES") {
            Some(raw) => parse_number::<i64>("COSTTRACK_STALE_MINUTES", &raw)?,
            None => DEFAULT_STALE_MINUTES,
        };
        if stale_minutes < 0 || Duration::try_minutes(stale_minutes).is_none() {
            return Err(TrackerError::Configuration(format!(
                "COSTTRACK_STALE_MINUTES must be a non-negative number of minutes in range, got {}",
                stale_minutes
            )));
        }

        let chunk_size = match var("COSTTRACK_CHUNK_SIZE") {
            Some(raw) => parse_number::<usize>("COSTTRACK_CHUNK_SIZE", &raw)?,
            None => DEFAULT_CHUNK_SIZE,
        };
        if chunk_size == 0 {
            return Err(TrackerError::Configuration("COSTTRACK_CHUNK_SIZE must be positive".to_string()));
        }

        Ok(Self {
            environment,
            state_dir,
            s3,
            stale_minutes,
            chunk_size,
        })
    }

    /// Out-of-range minutes saturate to the longest window.
    pub fn stale_window(&self) -> Duration {
        Duration::try_minutes(self.stale_minutes).unwrap_or(Duration::MAX)
    }

    /// The blob store these settings point at: S3 when a bucket is set,
    /// otherwise the local state directory.
    pub fn open_store(&self) -> Result<Box<dyn BlobStore>, TrackerError> {
        match &self.s3 {
            None => Ok(Box::new(FsBlobStore::new(self.state_dir.clone()))),
            #[cfg(feature = "s3")]
            Some(settings) => Ok(Box::new(crate::s3_store::S3BlobStore::new(settings)?)),
            #[cfg(not(feature = "s3"))]
            Some(settings) => Err(TrackerError::Configuration(format!(
                "bucket {} configured but costtrack was built without the s3 feature",
                settings.bucket
            ))),
        }
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T, TrackerError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| TrackerError::Configuration(format!("invalid {} value {:?}: {}", key, raw, e)))
}
