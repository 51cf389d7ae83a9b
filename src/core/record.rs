//! Resource records and the request/response types that flow through a pool.
//!
//! A [`ResourceRecord`] is a shared lifecycle base (status, success rate, usage
//! counters, timestamps, lease) plus a kind-specific [`ResourceDetails`]
//! payload. Pool logic works on the base uniformly; scoring and requirement
//! matching dispatch on the payload.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::error::OrchestratorError;
use crate::util::serde::{LeaseToken, ResourceId, ResourceKind};

/// Lifecycle state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Added and awaiting its first health check.
    Testing,
    /// Selectable by `lease`.
    Active,
    /// Quarantined; probed by the health checker until it recovers.
    Inactive,
    /// Rejected by its target service. Only a forced reactivation clears it.
    Banned,
    /// Past `expire_at`. Terminal.
    Expired,
}

impl ResourceStatus {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Testing => "testing",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Banned => "banned",
            Self::Expired => "expired",
        }
    }

    /// Banned and expired records never return to service on their own.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Banned | Self::Expired)
    }

    /// States the health checker probes.
    pub const fn is_probeable(self) -> bool {
        matches!(self, Self::Testing | Self::Inactive)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proxy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyProtocol {
    /// Plain HTTP proxy.
    Http,
    /// HTTPS (CONNECT) proxy.
    Https,
    /// SOCKS4.
    Socks4,
    /// SOCKS5.
    Socks5,
}

impl ProxyProtocol {
    /// URL scheme for this protocol.
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
        }
    }
}

/// How much of the client identity a proxy leaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anonymity {
    /// Forwards the client address.
    Transparent,
    /// Hides the client address but identifies as a proxy.
    Anonymous,
    /// Indistinguishable from a direct client.
    Elite,
    /// Not yet determined.
    #[default]
    Unknown,
}

/// Account category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Mailbox-backed account.
    Email,
    /// Personal profile.
    Personal,
    /// Guest/anonymous session.
    Guest,
    /// Organisation account.
    Corporate,
}

/// Kind of captcha a provider solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaType {
    /// Distorted text image.
    Image,
    /// Slider puzzle.
    Slider,
    /// Click-the-objects challenge.
    Click,
    /// Audio challenge.
    Audio,
}

/// Proxy-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySpec {
    /// Host name or IP address (v4 or v6).
    pub host: String,
    /// Port.
    pub port: u16,
    /// Protocol spoken by the proxy.
    pub protocol: ProxyProtocol,
    /// Exit country.
    #[serde(default)]
    pub country: Option<String>,
    /// Exit region.
    #[serde(default)]
    pub region: Option<String>,
    /// Upstream ISP.
    #[serde(default)]
    pub isp: Option<String>,
    /// Anonymity level.
    #[serde(default)]
    pub anonymity: Anonymity,
    /// Last measured response time.
    #[serde(default)]
    pub speed_ms: Option<u32>,
}

impl ProxySpec {
    /// Connection URL, e.g. `socks5://10.0.0.1:1080`.
    pub fn url(&self) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", self.protocol.scheme(), self.host, self.port)
        } else {
            format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
        }
    }
}

/// Account-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSpec {
    /// Login name.
    pub username: String,
    /// Platform the account belongs to.
    pub platform: String,
    /// Account category.
    pub account_type: AccountType,
    /// Opaque secret handed to the lessee (password, cookie jar, token).
    pub credential: String,
    /// Contact address.
    #[serde(default)]
    pub email: Option<String>,
}

/// Captcha-provider-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptchaProviderSpec {
    /// Display name.
    pub name: String,
    /// Captcha type solved.
    pub captcha_type: CaptchaType,
    /// Provider platform.
    pub platform: String,
    /// API key handed to the lessee.
    pub api_key: String,
    /// Average solve time.
    #[serde(default)]
    pub avg_response_ms: Option<u32>,
    /// Price per solve.
    #[serde(default)]
    pub cost_per_use: f64,
}

/// Kind-specific payload of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDetails {
    /// Proxy payload.
    Proxy(ProxySpec),
    /// Account payload.
    Account(AccountSpec),
    /// Captcha provider payload.
    CaptchaProvider(CaptchaProviderSpec),
}

impl ResourceDetails {
    /// Kind tag of this payload.
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Proxy(_) => ResourceKind::Proxy,
            Self::Account(_) => ResourceKind::Account,
            Self::CaptchaProvider(_) => ResourceKind::CaptchaProvider,
        }
    }

    /// Latency signal used for scoring, if the kind has one and it is known.
    pub const fn latency_ms(&self) -> Option<u32> {
        match self {
            Self::Proxy(p) => p.speed_ms,
            Self::Account(_) => None,
            Self::CaptchaProvider(c) => c.avg_response_ms,
        }
    }

    /// Cost signal used for scoring.
    pub const fn cost_per_use(&self) -> Option<f64> {
        match self {
            Self::CaptchaProvider(c) => Some(c.cost_per_use),
            Self::Proxy(_) | Self::Account(_) => None,
        }
    }

    /// Record a measured latency. Kinds without a latency signal ignore it.
    pub fn set_latency_ms(&mut self, latency_ms: u32) {
        match self {
            Self::Proxy(p) => p.speed_ms = Some(latency_ms),
            Self::CaptchaProvider(c) => c.avg_response_ms = Some(latency_ms),
            Self::Account(_) => {}
        }
    }

    /// What the lessee needs to actually use the resource.
    pub fn connection_details(&self) -> ConnectionDetails {
        match self {
            Self::Proxy(p) => ConnectionDetails::Proxy {
                url: p.url(),
                protocol: p.protocol,
            },
            Self::Account(a) => ConnectionDetails::Account {
                username: a.username.clone(),
                platform: a.platform.clone(),
                credential: a.credential.clone(),
            },
            Self::CaptchaProvider(c) => ConnectionDetails::CaptchaProvider {
                platform: c.platform.clone(),
                api_key: c.api_key.clone(),
                captcha_type: c.captcha_type,
            },
        }
    }
}

/// Connection details returned with a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionDetails {
    /// Proxy endpoint.
    Proxy {
        /// Connection URL.
        url: String,
        /// Protocol.
        protocol: ProxyProtocol,
    },
    /// Account login.
    Account {
        /// Login name.
        username: String,
        /// Platform.
        platform: String,
        /// Secret.
        credential: String,
    },
    /// Captcha solving endpoint.
    CaptchaProvider {
        /// Platform.
        platform: String,
        /// API key.
        api_key: String,
        /// Captcha type solved.
        captcha_type: CaptchaType,
    },
}

/// Bookkeeping for an outstanding lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ActiveLease {
    pub token: LeaseToken,
    pub leased_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// A leasable resource with its health and usage state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceRecord {
    /// Immutable identifier.
    pub id: ResourceId,
    /// Kind-specific payload.
    pub details: ResourceDetails,
    /// Lifecycle state.
    pub status: ResourceStatus,
    /// Rolling success score in `[0, 100]`.
    pub success_rate: f64,
    /// Lifetime successful releases.
    pub success_count: u64,
    /// Lifetime failed or banned releases.
    pub failure_count: u64,
    /// Failed outcomes since the last success (releases and probes).
    pub consecutive_failures: u32,
    /// Failed probes while inactive since the last success.
    pub probe_failures: u32,
    /// Successful uses since the last daily reset.
    pub daily_usage: u64,
    /// Successful uses since the last monthly reset.
    pub monthly_usage: u64,
    /// Optional per-day cap on `daily_usage`.
    pub daily_quota: Option<u64>,
    /// Last time the resource was leased.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Last time a probe result was applied.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Hard retirement time.
    pub expire_at: Option<DateTime<Utc>>,
    /// Set only while banned.
    pub ban_reason: Option<String>,
    /// Reason given for the latest quarantine.
    pub status_reason: Option<String>,
    /// Free-form admin notes.
    pub notes: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the latest status change.
    pub status_changed_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) lease: Option<ActiveLease>,
    #[serde(skip)]
    pub(crate) probing: bool,
}

impl ResourceRecord {
    pub(crate) fn new(
        id: ResourceId,
        input: NewResource,
        status: ResourceStatus,
        initial_success_rate: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            details: input.details,
            status,
            success_rate: initial_success_rate.clamp(0.0, 100.0),
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            probe_failures: 0,
            daily_usage: 0,
            monthly_usage: 0,
            daily_quota: input.daily_quota,
            last_used_at: None,
            last_checked_at: None,
            expire_at: input.expire_at,
            ban_reason: None,
            status_reason: None,
            notes: input.notes,
            created_at: now,
            status_changed_at: now,
            lease: None,
            probing: false,
        }
    }

    /// Kind of this record.
    pub const fn kind(&self) -> ResourceKind {
        self.details.kind()
    }

    /// Whether a caller currently holds the lease.
    pub const fn is_leased(&self) -> bool {
        self.lease.is_some()
    }

    /// Deadline of the outstanding lease, if any.
    pub fn lease_deadline(&self) -> Option<DateTime<Utc>> {
        self.lease.map(|l| l.deadline)
    }

    /// Whether `daily_usage` is below `daily_quota` (or no quota is set).
    pub fn has_quota_left(&self) -> bool {
        self.daily_quota.is_none_or(|quota| self.daily_usage < quota)
    }

    /// Whether `expire_at` has been reached.
    pub fn is_expiry_due(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|at| at <= now)
    }

    /// Candidate for `lease` before requirement matching.
    pub fn is_selectable(&self, now: DateTime<Utc>) -> bool {
        self.status == ResourceStatus::Active
            && self.lease.is_none()
            && !self.probing
            && self.has_quota_left()
            && !self.is_expiry_due(now)
    }

    pub(crate) fn set_status(&mut self, to: ResourceStatus, now: DateTime<Utc>) {
        if self.status != to {
            self.status = to;
            self.status_changed_at = now;
        }
        if to != ResourceStatus::Banned {
            self.ban_reason = None;
        }
    }

    pub(crate) fn touch_used(&mut self, now: DateTime<Utc>) {
        self.last_used_at = Some(self.last_used_at.map_or(now, |prev| prev.max(now)));
    }

    pub(crate) fn touch_checked(&mut self, now: DateTime<Utc>) {
        self.last_checked_at = Some(self.last_checked_at.map_or(now, |prev| prev.max(now)));
    }
}

/// Input for `add_resource`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResource {
    /// Kind-specific payload.
    pub details: ResourceDetails,
    /// Optional daily cap.
    #[serde(default)]
    pub daily_quota: Option<u64>,
    /// Optional retirement time.
    #[serde(default)]
    pub expire_at: Option<DateTime<Utc>>,
    /// Admin notes.
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewResource {
    /// Payload with no quota, expiry or notes.
    pub const fn new(details: ResourceDetails) -> Self {
        Self {
            details,
            daily_quota: None,
            expire_at: None,
            notes: None,
        }
    }

    /// Set a daily quota.
    #[must_use]
    pub const fn with_daily_quota(mut self, quota: u64) -> Self {
        self.daily_quota = Some(quota);
        self
    }

    /// Set an expiry time.
    #[must_use]
    pub const fn with_expire_at(mut self, at: DateTime<Utc>) -> Self {
        self.expire_at = Some(at);
        self
    }
}

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Partial admin update.
///
/// Only configuration fields may be set. The derived fields exist so a request
/// that names them can be rejected with [`OrchestratorError::ImmutableField`]
/// instead of being silently dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceUpdate {
    /// Replacement payload; must keep the same kind.
    pub details: Option<ResourceDetails>,
    /// `Some(None)` clears the quota.
    #[serde(deserialize_with = "deserialize_some")]
    pub daily_quota: Option<Option<u64>>,
    /// `Some(None)` clears the expiry.
    #[serde(deserialize_with = "deserialize_some")]
    pub expire_at: Option<Option<DateTime<Utc>>>,
    /// `Some(None)` clears the notes.
    #[serde(deserialize_with = "deserialize_some")]
    pub notes: Option<Option<String>>,
    /// Derived; rejected.
    pub success_rate: Option<f64>,
    /// Derived; rejected.
    pub daily_usage: Option<u64>,
    /// Derived; rejected.
    pub monthly_usage: Option<u64>,
    /// Derived; rejected. Use quarantine/reactivate.
    pub status: Option<ResourceStatus>,
    /// Derived; rejected.
    pub ban_reason: Option<String>,
}

impl ResourceUpdate {
    /// Reject updates that touch derived fields.
    pub fn check_mutable(&self) -> Result<(), OrchestratorError> {
        if self.success_rate.is_some() {
            return Err(OrchestratorError::ImmutableField("success_rate"));
        }
        if self.daily_usage.is_some() {
            return Err(OrchestratorError::ImmutableField("daily_usage"));
        }
        if self.monthly_usage.is_some() {
            return Err(OrchestratorError::ImmutableField("monthly_usage"));
        }
        if self.status.is_some() {
            return Err(OrchestratorError::ImmutableField("status"));
        }
        if self.ban_reason.is_some() {
            return Err(OrchestratorError::ImmutableField("ban_reason"));
        }
        Ok(())
    }
}

/// Constraints a caller places on the leased resource.
///
/// A constraint that does not apply to the pool's kind never matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseRequirements {
    /// Proxy protocol.
    pub protocol: Option<ProxyProtocol>,
    /// Proxy exit country (case-insensitive).
    pub country: Option<String>,
    /// Account or captcha platform (case-insensitive).
    pub platform: Option<String>,
    /// Account category.
    pub account_type: Option<AccountType>,
    /// Captcha type solved.
    pub captcha_type: Option<CaptchaType>,
    /// Upper bound on known latency; unknown latency does not qualify.
    pub max_latency_ms: Option<u32>,
}

fn eq_ignore_case(want: Option<&String>, have: Option<&String>) -> bool {
    want.is_none_or(|w| have.is_some_and(|h| h.eq_ignore_ascii_case(w)))
}

impl LeaseRequirements {
    /// No constraints.
    pub fn any() -> Self {
        Self::default()
    }

    /// Whether `details` satisfies every constraint.
    pub fn matches(&self, details: &ResourceDetails) -> bool {
        if let Some(max) = self.max_latency_ms {
            if details.latency_ms().is_none_or(|l| l > max) {
                return false;
            }
        }
        match details {
            ResourceDetails::Proxy(p) => {
                self.platform.is_none()
                    && self.account_type.is_none()
                    && self.captcha_type.is_none()
                    && self.protocol.is_none_or(|proto| proto == p.protocol)
                    && eq_ignore_case(self.country.as_ref(), p.country.as_ref())
            }
            ResourceDetails::Account(a) => {
                self.protocol.is_none()
                    && self.country.is_none()
                    && self.captcha_type.is_none()
                    && self.account_type.is_none_or(|t| t == a.account_type)
                    && eq_ignore_case(self.platform.as_ref(), Some(&a.platform))
            }
            ResourceDetails::CaptchaProvider(c) => {
                self.protocol.is_none()
                    && self.country.is_none()
                    && self.account_type.is_none()
                    && self.captcha_type.is_none_or(|t| t == c.captcha_type)
                    && eq_ignore_case(self.platform.as_ref(), Some(&c.platform))
            }
        }
    }
}

/// Listing filter for the admin surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceFilter {
    /// Exact status.
    pub status: Option<ResourceStatus>,
    /// Proxy protocol.
    pub protocol: Option<ProxyProtocol>,
    /// Proxy country (case-insensitive).
    pub country: Option<String>,
    /// Account/captcha platform (case-insensitive).
    pub platform: Option<String>,
    /// Leased or free.
    pub leased: Option<bool>,
}

impl ResourceFilter {
    /// Whether `record` passes the filter.
    pub fn matches(&self, record: &ResourceRecord) -> bool {
        if self.status.is_some_and(|s| s != record.status) {
            return false;
        }
        if self.leased.is_some_and(|l| l != record.is_leased()) {
            return false;
        }
        match &record.details {
            ResourceDetails::Proxy(p) => {
                self.protocol.is_none_or(|proto| proto == p.protocol)
                    && eq_ignore_case(self.country.as_ref(), p.country.as_ref())
                    && self.platform.is_none()
            }
            ResourceDetails::Account(AccountSpec { platform, .. })
            | ResourceDetails::CaptchaProvider(CaptchaProviderSpec { platform, .. }) => {
                self.protocol.is_none()
                    && self.country.is_none()
                    && eq_ignore_case(self.platform.as_ref(), Some(platform))
            }
        }
    }
}

/// What happened while the lessee used the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// Used successfully.
    Success,
    /// Request failed (timeout, error page, connection reset).
    Failure,
    /// Target service rejected the identity.
    Banned {
        /// Detector-supplied reason.
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ReleaseOutcome {
    /// Ban outcome with a reason.
    pub fn banned(reason: impl Into<String>) -> Self {
        Self::Banned {
            reason: Some(reason.into()),
        }
    }
}

impl fmt::Display for ReleaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure => f.write_str("failure"),
            Self::Banned { .. } => f.write_str("banned"),
        }
    }
}

/// Exclusive checkout of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Leased resource.
    pub resource_id: ResourceId,
    /// Pool kind.
    pub kind: ResourceKind,
    /// Token proving ownership of this lease.
    pub token: LeaseToken,
    /// Checkout time.
    pub leased_at: DateTime<Utc>,
    /// After this instant the orchestrator may reclaim the lease as failed.
    pub expires_at: DateTime<Utc>,
    /// How to use the resource.
    pub connection: ConnectionDetails,
}
