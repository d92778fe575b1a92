//! Job payload and queue row models
//!
//! The wire payload is parsed leniently into a [`JobEnvelope`] (every field
//! optional, unknown fields preserved) and then validated into a [`JobSpec`],
//! which is the only shape the pipeline works with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Kind of work a job asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Analyze,
    Process,
}

impl JobType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "analyze" => Ok(Self::Analyze),
            "process" => Ok(Self::Process),
            other => Err(PayloadError::UnknownJobType(other.to_string())),
        }
    }
}

/// Git hosting platform a repository lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GitProviderKind {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
}

impl GitProviderKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
        }
    }
}

impl fmt::Display for GitProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GitProviderKind {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            other => Err(PayloadError::UnknownProvider(other.to_string())),
        }
    }
}

/// Access token for the git provider
///
/// `Debug` and `Display` never print the value; call [`GitToken::expose`] at
/// the single point where the token is handed to the provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GitToken(String);

impl GitToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for GitToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GitToken(***)")
    }
}

impl fmt::Display for GitToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Opaque name of a stored git credential
///
/// Producers put this in the payload instead of the secret; the fetcher
/// resolves it to a [`GitToken`] right before talking to the provider.
/// It is still kept out of `Debug` output in case a producer sends a raw
/// token by mistake.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GitTokenRef(String);

impl GitTokenRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for GitTokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GitTokenRef(***)")
    }
}

/// Per-job processing overrides
///
/// Known keys are typed; anything else is kept verbatim in `extra` so
/// producers can add settings without breaking older workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_overlap: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_extensions: Option<Vec<String>>,

    /// Re-process even when the context is already complete at the fetched commit
    #[serde(default)]
    pub force: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Inner `payload` object of a queue message, as received
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default, deserialize_with = "string_or_number")]
    pub context_id: Option<String>,

    #[serde(default, deserialize_with = "string_or_number")]
    pub repo_id: Option<String>,

    #[serde(default)]
    pub relative_path: Option<String>,

    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default)]
    pub git_provider: Option<String>,

    /// Credential reference; the wire name predates references
    #[serde(default)]
    pub git_token: Option<GitTokenRef>,

    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub config: Option<ConfigOverrides>,

    /// Receives a POST of the processing result once the job is acked or dead-lettered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,

    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// Top-level queue message: `{ "job_type": ..., "payload": { ... } }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobEnvelope {
    #[serde(default)]
    pub job_type: Option<String>,

    #[serde(default)]
    pub payload: Option<JobPayload>,

    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// Why a payload could not be turned into a [`JobSpec`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Malformed job payload: {0}")]
    Malformed(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Unknown git provider: {0}")]
    UnknownProvider(String),
}

/// Validated job, the only shape the pipeline consumes
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub job_type: JobType,
    pub context_id: String,
    pub repo_id: String,
    pub relative_path: String,
    pub branch: String,
    pub git_provider: GitProviderKind,
    pub git_token_ref: Option<GitTokenRef>,
    pub user_id: String,
    pub priority: i32,
    pub config: ConfigOverrides,
    pub callback_url: Option<String>,
    pub extensions: Map<String, Value>,
}

impl JobSpec {
    /// Parse and validate a raw queue payload
    ///
    /// # Errors
    /// Returns `PayloadError` describing the first problem found
    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        if !value.is_object() {
            return Err(PayloadError::Malformed(
                "expected a JSON object".to_string(),
            ));
        }
        let envelope = JobEnvelope::deserialize(value)
            .map_err(|e| PayloadError::Malformed(e.to_string()))?;
        envelope.validate()
    }
}

impl JobEnvelope {
    pub fn new(job_type: JobType, payload: JobPayload) -> Self {
        Self {
            job_type: Some(job_type.as_str().to_string()),
            payload: Some(payload),
            extensions: Map::new(),
        }
    }

    /// Validate into a [`JobSpec`]
    ///
    /// # Errors
    /// Returns `PayloadError` for missing/blank required fields, unknown
    /// enumerations or a malformed repository path
    pub fn validate(self) -> Result<JobSpec, PayloadError> {
        let job_type: JobType = required(self.job_type, "job_type")?.parse()?;
        let payload = self.payload.ok_or(PayloadError::MissingField("payload"))?;

        let context_id = required(payload.context_id, "context_id")?;
        let repo_id = required(payload.repo_id, "repo_id")?;
        let relative_path = required(payload.relative_path, "relative_path")?;
        let branch = required(payload.branch, "branch")?;
        let git_provider: GitProviderKind =
            required(payload.git_provider, "git_provider")?.parse()?;
        let user_id = required(payload.user_id, "user_id")?;

        let relative_path = normalize_relative_path(&relative_path)?;
        let config = payload.config.unwrap_or_default();
        if let (Some(size), Some(overlap)) = (config.chunk_size, config.chunk_overlap) {
            if size == 0 || overlap >= size {
                return Err(PayloadError::InvalidField {
                    field: "config.chunk_overlap",
                    message: format!("overlap {overlap} must be smaller than chunk size {size}"),
                });
            }
        }

        let callback_url = payload
            .callback_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        if let Some(url) = &callback_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(PayloadError::InvalidField {
                    field: "callback_url",
                    message: "must be an http or https URL".to_string(),
                });
            }
        }

        let mut extensions = self.extensions;
        extensions.extend(payload.extensions);

        Ok(JobSpec {
            job_type,
            context_id,
            repo_id,
            relative_path,
            branch: branch.trim().to_string(),
            git_provider,
            git_token_ref: payload.git_token.filter(|reference| !reference.is_blank()),
            user_id,
            priority: payload.priority.unwrap_or_default(),
            config,
            callback_url,
            extensions,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, PayloadError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(PayloadError::MissingField(field)),
    }
}

/// `org/repo` (GitLab allows nested groups: `group/sub/repo`)
fn normalize_relative_path(raw: &str) -> Result<String, PayloadError> {
    let trimmed = raw.trim().trim_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let segments: Vec<&str> = trimmed.split('/').collect();

    let valid = segments.len() >= 2
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && *segment != "."
                && *segment != ".."
                && !segment.chars().any(char::is_whitespace)
        });

    if valid {
        Ok(segments.join("/"))
    } else {
        Err(PayloadError::InvalidField {
            field: "relative_path",
            message: format!("expected owner/repository, got '{raw}'"),
        })
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A job handed to one worker for the duration of a lease
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// Delivery id, unique per claim; every later queue call for this delivery uses it
    pub job_id: Uuid,

    /// Stable id of the logical job across redeliveries
    pub message_id: Uuid,

    /// `job_type` as stored at enqueue time (informational; the payload is authoritative)
    pub job_type: String,

    /// Raw message body, validated by the processor
    pub payload: Value,
    pub priority: i32,

    /// 1 on the first delivery, incremented on every claim
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

/// A job to be enqueued by a producer
#[derive(Debug, Clone)]
pub struct NewJob {
    pub payload: Value,
    pub priority: i32,
    /// Invisible to claimants until this much time has passed
    pub delay: std::time::Duration,
}

impl NewJob {
    pub fn new(payload: Value) -> Self {
        let priority = payload
            .pointer("/payload/priority")
            .and_then(Value::as_i64)
            .and_then(|p| i32::try_from(p).ok())
            .unwrap_or_default();

        Self {
            payload,
            priority,
            delay: std::time::Duration::ZERO,
        }
    }

    /// Serialize an envelope into a new job
    ///
    /// # Errors
    /// Returns the serializer error if the envelope cannot be encoded
    pub fn from_envelope(envelope: &JobEnvelope) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_value(envelope)?))
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Value stored in the `job_type` column
    pub fn job_type_label(&self) -> String {
        self.payload
            .get("job_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    }
}

/// A job removed from circulation after exhausting retries or failing permanently
#[derive(Debug, Clone)]
pub struct DeadLetteredJob {
    pub message_id: Uuid,
    pub job_type: String,
    pub payload: Value,
    pub attempt_count: u32,
    pub reason: String,
    pub enqueued_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Queue depth statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    /// Waiting, including jobs delayed by a retry backoff
    pub queued: i64,
    /// Currently leased (including leases that have expired but not been re-claimed)
    pub leased: i64,
    pub dead_lettered: i64,
}

/// A leased job as seen by operators: who holds it and how far it got
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlightJob {
    pub message_id: Uuid,
    pub job_type: String,
    pub attempt_count: u32,
    pub claimed_by: Option<String>,
    /// Last pipeline stage the holder reported, if any
    pub stage: Option<String>,
    pub stage_updated_at: Option<DateTime<Utc>>,
    pub lease_expires_at: DateTime<Utc>,
}
