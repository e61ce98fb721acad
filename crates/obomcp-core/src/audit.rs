//! Audit subsystem
//!
//! Every public operation of every engine component writes exactly one
//! terminal audit entry here. Entries are structured, buffered in a bounded
//! ring, and mirrored to the `tracing` ecosystem under the `audit::engine`
//! target so an operator can ship them without draining the ring.
//!
//! When auditing is disabled in configuration, callers still get a sink -
//! [`NullAuditService`] satisfies the same surface with zero side effects, so
//! no component ever branches on whether audit is enabled.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Where an audit entry originated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditSource {
    /// Authentication service decisions (`auth:service`)
    Service,
    /// JWT validation outcomes (`auth:jwt`)
    Jwt,
    /// Token-exchange calls (`token-exchange`)
    TokenExchange,
    /// Encrypted token cache events (`cache`)
    Cache,
    /// A delegation module, by instance name (`delegation:<module>`)
    Delegation(String),
}

impl fmt::Display for AuditSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => f.write_str("auth:service"),
            Self::Jwt => f.write_str("auth:jwt"),
            Self::TokenExchange => f.write_str("token-exchange"),
            Self::Cache => f.write_str("cache"),
            Self::Delegation(module) => write!(f, "delegation:{module}"),
        }
    }
}

impl Serialize for AuditSource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AuditSource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        match tag.as_str() {
            "auth:service" => Ok(Self::Service),
            "auth:jwt" => Ok(Self::Jwt),
            "token-exchange" => Ok(Self::TokenExchange),
            "cache" => Ok(Self::Cache),
            other => match other.strip_prefix("delegation:") {
                Some(module) if !module.is_empty() => Ok(Self::Delegation(module.to_string())),
                _ => Err(serde::de::Error::custom(format!(
                    "unknown audit source tag: {other}"
                ))),
            },
        }
    }
}

/// A single audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event happened
    #[serde(with = "system_time_serde")]
    pub timestamp: SystemTime,
    /// Originating component
    pub source: AuditSource,
    /// Authenticated user, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Request-scoped session id, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// What was attempted
    pub action: String,
    /// Target of the action, when meaningful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Outcome
    pub success: bool,
    /// Policy reason for a negative outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Error detail for a failed outcome (full detail lives only here)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form extra context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditEntry {
    /// Create a successful entry
    pub fn success(source: AuditSource, action: impl Into<String>) -> Self {
        Self::new(source, action, true)
    }

    /// Create a failed entry
    pub fn failure(source: AuditSource, action: impl Into<String>) -> Self {
        Self::new(source, action, false)
    }

    fn new(source: AuditSource, action: impl Into<String>, success: bool) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source,
            user_id: None,
            session_id: None,
            action: action.into(),
            resource: None,
            success,
            reason: None,
            error: None,
            metadata: None,
        }
    }

    /// Attach a user id
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach a session id
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a resource
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attach a policy reason
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach error detail
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Filter for [`AuditSink::entries`]
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Only entries at or after this instant
    pub since: Option<SystemTime>,
    /// Only entries at or before this instant
    pub until: Option<SystemTime>,
    /// Only entries from this source
    pub source: Option<AuditSource>,
    /// Only entries for this user
    pub user_id: Option<String>,
    /// Only entries with this outcome
    pub success: Option<bool>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(since) = self.since
            && entry.timestamp < since
        {
            return false;
        }
        if let Some(until) = self.until
            && entry.timestamp > until
        {
            return false;
        }
        if let Some(source) = &self.source
            && entry.source != *source
        {
            return false;
        }
        if let Some(user_id) = &self.user_id
            && entry.user_id.as_deref() != Some(user_id.as_str())
        {
            return false;
        }
        if let Some(success) = self.success
            && entry.success != success
        {
            return false;
        }
        true
    }
}

/// Callback invoked with entries evicted by the capacity bound
pub type OverflowCallback = Arc<dyn Fn(AuditEntry) + Send + Sync>;

/// The audit surface every component writes to
pub trait AuditSink: Send + Sync {
    /// Append one entry
    fn log(&self, entry: AuditEntry);

    /// Return entries matching the filter, oldest first
    fn entries(&self, filter: &AuditFilter) -> Vec<AuditEntry>;

    /// Drop all buffered entries
    fn clear(&self);
}

/// Audit configuration (the `auth.audit` config section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditConfig {
    /// Whether the buffering service is active
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ring capacity before oldest-entry eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Entries older than this horizon are dropped on append
    #[serde(default)]
    pub retention_days: Option<u32>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_entries() -> usize {
    1000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_entries: default_max_entries(),
            retention_days: None,
        }
    }
}

/// Build the configured sink: a ring service when enabled, the null object
/// otherwise.
pub fn audit_sink_from_config(
    config: &AuditConfig,
    overflow: Option<OverflowCallback>,
) -> Arc<dyn AuditSink> {
    if config.enabled {
        Arc::new(RingAuditService::new(config.clone(), overflow))
    } else {
        Arc::new(NullAuditService)
    }
}

/// Bounded in-memory audit service
///
/// Entries are mirrored to `tracing` (target `audit::engine`) on append.
/// The single writer lock is held only for the buffer update; the overflow
/// callback runs outside it.
pub struct RingAuditService {
    max_entries: usize,
    retention: Option<Duration>,
    buffer: Mutex<VecDeque<AuditEntry>>,
    overflow: Option<OverflowCallback>,
}

impl fmt::Debug for RingAuditService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingAuditService")
            .field("max_entries", &self.max_entries)
            .field("retention", &self.retention)
            .field("len", &self.buffer.lock().len())
            .field("overflow", &self.overflow.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl RingAuditService {
    /// Create a service from configuration
    pub fn new(config: AuditConfig, overflow: Option<OverflowCallback>) -> Self {
        Self {
            max_entries: config.max_entries.max(1),
            retention: config
                .retention_days
                .map(|days| Duration::from_secs(u64::from(days) * 86_400)),
            buffer: Mutex::new(VecDeque::new()),
            overflow,
        }
    }

    /// Number of buffered entries
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    fn emit_trace(entry: &AuditEntry) {
        if entry.success {
            info!(
                target: "audit::engine",
                source = %entry.source,
                action = %entry.action,
                user_id = ?entry.user_id,
                session_id = ?entry.session_id,
                resource = ?entry.resource,
                "audit"
            );
        } else {
            warn!(
                target: "audit::engine",
                source = %entry.source,
                action = %entry.action,
                user_id = ?entry.user_id,
                session_id = ?entry.session_id,
                resource = ?entry.resource,
                reason = ?entry.reason,
                error = ?entry.error,
                "audit"
            );
        }
    }
}

impl AuditSink for RingAuditService {
    fn log(&self, entry: AuditEntry) {
        Self::emit_trace(&entry);

        let mut evicted = Vec::new();
        {
            let mut buffer = self.buffer.lock();
            if let Some(retention) = self.retention {
                let horizon = SystemTime::now()
                    .checked_sub(retention)
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                while buffer.front().is_some_and(|e| e.timestamp < horizon) {
                    buffer.pop_front();
                }
            }
            buffer.push_back(entry);
            while buffer.len() > self.max_entries {
                if let Some(old) = buffer.pop_front() {
                    evicted.push(old);
                }
            }
        }

        if let Some(callback) = &self.overflow {
            for old in evicted {
                callback(old);
            }
        }
    }

    fn entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    fn clear(&self) {
        self.buffer.lock().clear();
    }
}

/// No-op sink used when auditing is disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditService;

impl AuditSink for NullAuditService {
    fn log(&self, _entry: AuditEntry) {}

    fn entries(&self, _filter: &AuditFilter) -> Vec<AuditEntry> {
        Vec::new()
    }

    fn clear(&self) {}
}

mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(source: AuditSource, success: bool) -> AuditEntry {
        if success {
            AuditEntry::success(source, "test")
        } else {
            AuditEntry::failure(source, "test")
        }
    }

    #[test]
    fn ring_appends_and_filters() {
        let service = RingAuditService::new(AuditConfig::default(), None);
        service.log(entry(AuditSource::Jwt, true).with_user("u-1"));
        service.log(entry(AuditSource::Service, false).with_user("u-2"));

        let all = service.entries(&AuditFilter::default());
        assert_eq!(all.len(), 2);

        let failures = service.entries(&AuditFilter {
            success: Some(false),
            ..Default::default()
        });
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].user_id.as_deref(), Some("u-2"));

        let jwt_only = service.entries(&AuditFilter {
            source: Some(AuditSource::Jwt),
            ..Default::default()
        });
        assert_eq!(jwt_only.len(), 1);
    }

    #[test]
    fn ring_evicts_oldest_and_invokes_overflow() {
        let overflowed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&overflowed);
        let config = AuditConfig {
            enabled: true,
            max_entries: 2,
            retention_days: None,
        };
        let service = RingAuditService::new(
            config,
            Some(Arc::new(move |_entry| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        for _ in 0..5 {
            service.log(entry(AuditSource::Cache, true));
        }

        assert_eq!(service.len(), 2);
        assert_eq!(overflowed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn time_range_filter() {
        let service = RingAuditService::new(AuditConfig::default(), None);
        let before = SystemTime::now() - Duration::from_secs(60);
        service.log(entry(AuditSource::Jwt, true));

        let recent = service.entries(&AuditFilter {
            since: Some(before),
            ..Default::default()
        });
        assert_eq!(recent.len(), 1);

        let future_only = service.entries(&AuditFilter {
            since: Some(SystemTime::now() + Duration::from_secs(60)),
            ..Default::default()
        });
        assert!(future_only.is_empty());

        let past_only = service.entries(&AuditFilter {
            until: Some(before),
            ..Default::default()
        });
        assert!(past_only.is_empty());
    }

    #[test]
    fn retention_drops_aged_entries_on_append() {
        let config = AuditConfig {
            enabled: true,
            max_entries: 100,
            retention_days: Some(1),
        };
        let service = RingAuditService::new(config, None);
        let mut aged = entry(AuditSource::Jwt, true);
        aged.timestamp = SystemTime::now() - Duration::from_secs(3 * 86_400);
        service.log(aged);
        // The aged entry survives until the next append prunes it.
        service.log(entry(AuditSource::Jwt, true));
        assert_eq!(service.len(), 1);
    }

    #[test]
    fn clear_empties_buffer() {
        let service = RingAuditService::new(AuditConfig::default(), None);
        service.log(entry(AuditSource::TokenExchange, true));
        service.clear();
        assert!(service.is_empty());
    }

    #[test]
    fn null_service_has_no_side_effects() {
        let service = NullAuditService;
        service.log(entry(AuditSource::Service, true));
        assert!(service.entries(&AuditFilter::default()).is_empty());
    }

    #[test]
    fn source_tags_round_trip() {
        for source in [
            AuditSource::Service,
            AuditSource::Jwt,
            AuditSource::TokenExchange,
            AuditSource::Cache,
            AuditSource::Delegation("db".to_string()),
        ] {
            let json = serde_json::to_string(&source).unwrap();
            let back: AuditSource = serde_json::from_str(&json).unwrap();
            assert_eq!(source, back);
        }
        assert_eq!(
            serde_json::to_string(&AuditSource::Delegation("db".to_string())).unwrap(),
            "\"delegation:db\""
        );
    }

    #[test]
    fn sink_from_config_respects_enabled() {
        let enabled = audit_sink_from_config(&AuditConfig::default(), None);
        enabled.log(entry(AuditSource::Service, true));
        assert_eq!(enabled.entries(&AuditFilter::default()).len(), 1);

        let disabled = audit_sink_from_config(
            &AuditConfig {
                enabled: false,
                ..Default::default()
            },
            None,
        );
        disabled.log(entry(AuditSource::Service, true));
        assert!(disabled.entries(&AuditFilter::default()).is_empty());
    }
}
