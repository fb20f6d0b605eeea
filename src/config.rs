//! Run parameters and settings
//!
//! Settings come from an optional YAML file and the environment; run
//! parameters come from the command line. Precedence is command line,
//! then YAML, then environment, then built-in defaults.

use crate::client::Protocol;
use crate::etl::{LoopOptions, Mode, StartPosition};
use crate::transform::TransformRegistry;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use eyre::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Settings file picked up from the working directory when present
pub const DEFAULT_SETTINGS_FILE: &str = "sdump.yml";

const DEFAULT_TABLE_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_STREAM_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(5000);

/// The kind of remote store a source identifier names
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Table,
    Stream,
}

impl SourceKind {
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Table => Protocol::DynamoDb,
            Self::Stream => Protocol::Kinesis,
        }
    }

    /// Default pause between two fetches
    pub fn default_delay(&self) -> Duration {
        match self {
            Self::Table => DEFAULT_TABLE_DELAY,
            Self::Stream => DEFAULT_STREAM_DELAY,
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            Self::Table => "SDUMP_TABLE",
            Self::Stream => "SDUMP_STREAM",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Stream => write!(f, "stream"),
        }
    }
}

/// How records are written to the sink
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Decoded records as NDJSON
    #[default]
    Structured,
    /// Native payload bytes, one record per line
    RawPassthrough,
}

/// Start position as given by the operator
#[derive(Clone, Debug, PartialEq)]
pub enum StartSpec {
    /// An absolute instant
    Absolute(DateTime<Utc>),
    /// An offset back from the time the run starts
    Relative(Duration),
}

impl StartSpec {
    /// Parse `YYYY-MM-DD[THH[:MM[:SS]]]` (local time) or RFC 3339
    pub fn parse_start(text: &str) -> Result<Self> {
        if let Ok(at) = DateTime::parse_from_rfc3339(text) {
            return Ok(Self::Absolute(at.with_timezone(&Utc)));
        }

        let invalid = || eyre::eyre!("start '{}' is not in format YYYY-MM-DD[THH[:MM[:SS]]]", text);
        let (date, time) = match text.split_once(['T', ' ']) {
            Some((date, time)) => (date, Some(time)),
            None => (text, None),
        };
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;

        let mut parts = [0u32; 3];
        if let Some(time) = time {
            let fields: Vec<&str> = time.split(':').collect();
            if fields.is_empty() || fields.len() > 3 {
                return Err(invalid());
            }
            for (slot, field) in parts.iter_mut().zip(fields) {
                *slot = field.parse().map_err(|_| invalid())?;
            }
        }
        let time = NaiveTime::from_hms_opt(parts[0], parts[1], parts[2]).ok_or_else(invalid)?;

        let local = Local
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .ok_or_else(|| eyre::eyre!("start '{}' does not exist in the local time zone", text))?;
        Ok(Self::Absolute(local.with_timezone(&Utc)))
    }

    /// Parse `INT[smhd]`, seconds when no suffix is given
    pub fn parse_since(text: &str) -> Result<Self> {
        let since_re = Regex::new(r"^(\d+)([smhd]?)$")?;
        let captures = since_re
            .captures(text)
            .ok_or_else(|| eyre::eyre!("since '{}' is not in format INT[smhd]", text))?;

        let amount: u64 = captures[1]
            .parse()
            .with_context(|| format!("since '{}' is out of range", text))?;
        let multiplier = match &captures[2] {
            "m" => 60,
            "h" => 3600,
            "d" => 24 * 3600,
            _ => 1,
        };
        let seconds = amount
            .checked_mul(multiplier)
            .ok_or_else(|| eyre::eyre!("since '{}' is out of range", text))?;
        Ok(Self::Relative(Duration::from_secs(seconds)))
    }

    /// Resolve into an absolute start position relative to `now`
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<StartPosition> {
        match self {
            Self::Absolute(at) => Ok(StartPosition::AtTimestamp(*at)),
            Self::Relative(offset) => {
                let offset = chrono::Duration::from_std(*offset)?;
                now.checked_sub_signed(offset)
                    .map(StartPosition::AtTimestamp)
                    .ok_or_else(|| eyre::eyre!("start offset {:?} is too far in the past", offset))
            }
        }
    }
}

/// Parameters of one extraction run
#[derive(Clone, Debug)]
pub struct RunParams {
    pub source: String,
    pub kind: SourceKind,
    pub record_limit: Option<u64>,
    pub base_delay: Option<Duration>,
    pub start: Option<StartSpec>,
    pub follow: bool,
    pub output_mode: OutputMode,
    /// Shard to read when a stream has several
    pub shard: Option<String>,
    /// Transforms applied after the source's registered ones
    pub transforms: Vec<String>,
}

impl RunParams {
    pub fn new(source: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            source: source.into(),
            kind,
            record_limit: None,
            base_delay: None,
            start: None,
            follow: false,
            output_mode: OutputMode::default(),
            shard: None,
            transforms: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::new(self.record_limit, self.follow)
    }

    /// Reject parameter combinations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            eyre::bail!("Source identifier must not be empty");
        }
        if self.base_delay.is_some_and(|d| d.is_zero()) {
            eyre::bail!("Delay between calls must be greater than zero");
        }
        if self.follow && self.record_limit == Some(0) {
            eyre::bail!("Following {} with a record limit of 0 would never read", self.source);
        }
        if self.kind == SourceKind::Table {
            if self.follow {
                eyre::bail!("Follow mode is only available for streams, not table {}", self.source);
            }
            if self.start.is_some() {
                eyre::bail!("Table {} can only be scanned from the beginning", self.source);
            }
            if self.shard.is_some() {
                eyre::bail!("Table {} has no shards", self.source);
            }
        }
        for name in &self.transforms {
            TransformRegistry::build(name)?;
        }
        Ok(())
    }

    /// Build loop options, resolving relative starts against `now`
    pub fn loop_options(&self, settings: &Settings, now: DateTime<Utc>) -> Result<LoopOptions> {
        self.validate()?;
        let kind = settings.kind(self.kind);

        let base_delay = self
            .base_delay
            .or(kind.base_delay_ms.map(Duration::from_millis))
            .unwrap_or(self.kind.default_delay());
        let max_delay = kind.max_delay_ms.map(Duration::from_millis);
        let idle_interval = kind
            .idle_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_IDLE_INTERVAL);

        if base_delay.is_zero() || idle_interval.is_zero() {
            eyre::bail!("Configured {} delays must be greater than zero", self.kind);
        }
        if max_delay.is_some_and(|max| max < base_delay) {
            eyre::bail!(
                "Configured {} max delay is below the base delay of {:?}",
                self.kind,
                base_delay
            );
        }

        let start = match &self.start {
            Some(spec) => spec.resolve(now)?,
            None => StartPosition::Beginning,
        };

        Ok(LoopOptions {
            label: self.source.clone(),
            mode: self.mode(),
            start,
            base_delay,
            max_delay,
            idle_interval,
        })
    }
}

/// Per-kind settings from the YAML file
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KindSettings {
    pub endpoint: Option<String>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub idle_interval_ms: Option<u64>,
}

/// Settings shared by every run of a process
///
/// # Example
/// ```
/// use store_dump::config::Settings;
///
/// let settings: Settings = serde_yaml::from_str(r#"
/// stream:
///   endpoint: http://localhost:4566
///   idle_interval_ms: 2000
/// transforms:
///   fbt-event: [base64-json]
/// "#).unwrap();
/// assert_eq!(settings.stream.idle_interval_ms, Some(2000));
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub table: KindSettings,
    pub stream: KindSettings,
    /// Source identifier -> transform names
    pub transforms: HashMap<String, Vec<String>>,
}

impl Settings {
    /// Read settings from a YAML file
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    /// Read `path` if given, otherwise the default settings file if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None if Path::new(DEFAULT_SETTINGS_FILE).exists() => {
                log::debug!("Loading settings from {}", DEFAULT_SETTINGS_FILE);
                Self::read(DEFAULT_SETTINGS_FILE)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn kind(&self, kind: SourceKind) -> &KindSettings {
        match kind {
            SourceKind::Table => &self.table,
            SourceKind::Stream => &self.stream,
        }
    }

    /// Endpoint for `kind`: settings file, then `SDUMP_<KIND>_ENDPOINT`,
    /// then the regional endpoint for `AWS_REGION`
    pub fn endpoint(&self, kind: SourceKind) -> Result<Url> {
        let env_var = format!("{}_ENDPOINT", kind.env_prefix());
        let configured = self
            .kind(kind)
            .endpoint
            .clone()
            .or_else(|| std::env::var(&env_var).ok());

        if let Some(endpoint) = configured {
            return Url::parse(&endpoint)
                .with_context(|| format!("Invalid {} endpoint: {}", kind, endpoint));
        }

        match std::env::var("AWS_REGION").or_else(|_| std::env::var("AWS_DEFAULT_REGION")) {
            Ok(region) => kind.protocol().regional_endpoint(&region),
            Err(_) => eyre::bail!(
                "No {} endpoint configured: set it in {}, {} or AWS_REGION",
                kind,
                DEFAULT_SETTINGS_FILE,
                env_var
            ),
        }
    }

    /// Transform registry built from the `transforms` map
    pub fn registry(&self) -> Result<TransformRegistry> {
        TransformRegistry::from_map(self.transforms.clone())
            .with_context(|| "Invalid transforms in settings")
    }
}
