//! Circuit breaker state machine for a single (api configuration, provider).
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      consecutive_failures >= failure_threshold
//! Open      → HalfOpen:  first admission check once timeout_seconds elapsed
//! HalfOpen  → Closed:    consecutive_successes >= success_threshold
//! HalfOpen  → Open:      the trial call fails
//! ```
//!
//! Half-open admits one trial call at a time, identified by a
//! [`ProbeTicket`]. Results of calls admitted earlier still count toward the
//! lifetime totals but cannot close or reopen the breaker.
//!
//! The manual override is kept beside the computed state rather than folded
//! into it, so re-enabling a breaker restores whatever the counters say.
//! Timeouts are evaluated lazily on admission; nothing here waits.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Addresses one breaker record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakerKey {
    pub api_config_id: Uuid,
    pub provider: String,
}

impl BreakerKey {
    pub fn new(api_config_id: Uuid, provider: impl Into<String>) -> Self {
        Self {
            api_config_id,
            provider: provider.into(),
        }
    }
}

impl fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.api_config_id)
    }
}

/// Computed breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakerState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "closed" => Ok(BreakerState::Closed),
            "open" => Ok(BreakerState::Open),
            "half_open" => Ok(BreakerState::HalfOpen),
            other => Err(format!("unknown breaker state '{other}'")),
        }
    }
}

/// Operator override layered over the computed state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "override", rename_all = "snake_case")]
pub enum ManualOverride {
    #[default]
    None,
    Disabled { reason: Option<String> },
}

impl ManualOverride {
    pub fn is_disabled(&self) -> bool {
        matches!(self, ManualOverride::Disabled { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ManualOverride::Disabled { reason } => reason.as_deref(),
            ManualOverride::None => None,
        }
    }
}

/// Classification of a failed provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Timeout,
    RateLimited,
    AuthError,
    ClientError,
    ServerError,
    NetworkError,
    ParseError,
    Unknown,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::Timeout => "timeout",
            FailureType::RateLimited => "rate_limited",
            FailureType::AuthError => "auth_error",
            FailureType::ClientError => "client_error",
            FailureType::ServerError => "server_error",
            FailureType::NetworkError => "network_error",
            FailureType::ParseError => "parse_error",
            FailureType::Unknown => "unknown",
        }
    }

    /// Classify a failed call from its upstream status. `None` means the
    /// request never produced a response.
    pub fn classify(status_code: Option<u16>) -> Self {
        match status_code {
            None => FailureType::NetworkError,
            Some(408 | 504) => FailureType::Timeout,
            Some(429) => FailureType::RateLimited,
            Some(401 | 403) => FailureType::AuthError,
            Some(400..=499) => FailureType::ClientError,
            Some(500..=599) => FailureType::ServerError,
            Some(_) => FailureType::Unknown,
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "timeout" => Ok(FailureType::Timeout),
            "rate_limited" => Ok(FailureType::RateLimited),
            "auth_error" => Ok(FailureType::AuthError),
            "client_error" => Ok(FailureType::ClientError),
            "server_error" => Ok(FailureType::ServerError),
            "network_error" => Ok(FailureType::NetworkError),
            "parse_error" => Ok(FailureType::ParseError),
            "unknown" => Ok(FailureType::Unknown),
            other => Err(format!("unknown failure type '{other}'")),
        }
    }
}

/// Thresholds of one breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerThresholds {
    /// Consecutive failures that open a closed breaker
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the breaker
    pub success_threshold: u32,
    /// Seconds an open breaker refuses calls before probing
    pub timeout_seconds: u64,
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_seconds: 60,
        }
    }
}

/// Outcome of a completed provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure {
        failure_type: FailureType,
        reason: Option<String>,
    },
}

impl CallOutcome {
    pub fn failure(failure_type: FailureType, reason: impl Into<String>) -> Self {
        CallOutcome::Failure {
            failure_type,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success)
    }
}

/// Identifies one half-open trial call of a record. Only the holder of the
/// current ticket may resolve the half-open state or release its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ProbeTicket(u64);

/// Admission decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Admission {
    /// The call may proceed. `probe` is set for the single half-open trial call.
    Admitted { probe: Option<ProbeTicket> },
    /// The call must be skipped for now
    Blocked {
        reason: String,
        retry_after_seconds: Option<u64>,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    pub fn probe(&self) -> Option<ProbeTicket> {
        match self {
            Admission::Admitted { probe } => *probe,
            Admission::Blocked { .. } => None,
        }
    }

    pub fn block_reason(&self) -> Option<&str> {
        match self {
            Admission::Blocked { reason, .. } => Some(reason),
            Admission::Admitted { .. } => None,
        }
    }
}

/// Administrative action on a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualAction {
    Enable,
    Disable,
    Reset,
}

impl ManualAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManualAction::Enable => "enable",
            ManualAction::Disable => "disable",
            ManualAction::Reset => "reset",
        }
    }
}

impl FromStr for ManualAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "enable" => Ok(ManualAction::Enable),
            "disable" => Ok(ManualAction::Disable),
            "reset" => Ok(ManualAction::Reset),
            other => Err(format!("unknown manual action '{other}'")),
        }
    }
}

/// The latest administrative action on a record. Stored with the row so
/// that every process sharing it can apply the same change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualChange {
    /// Counts administrative actions on the record, starting at 1
    pub revision: u64,
    pub action: ManualAction,
    pub reason: Option<String>,
}

/// State change caused by one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
}

/// One breaker record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerRecord {
    pub key: BreakerKey,
    pub state: BreakerState,
    pub manual_override: ManualOverride,
    pub failure_count: u32,
    pub consecutive_failures: u32,
    pub success_count: u32,
    pub consecutive_successes: u32,
    pub thresholds: BreakerThresholds,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    pub last_failure_type: Option<FailureType>,
    /// Incremented on every persisted-field mutation
    pub revision: u64,
    pub last_manual: Option<ManualChange>,
    /// Ticket of the admitted, unresolved half-open call. Not persisted.
    pub probe_in_flight: Option<ProbeTicket>,
    /// Tickets handed out so far. Not persisted.
    pub probes_issued: u64,
}

impl CircuitBreakerRecord {
    pub fn new(key: BreakerKey, thresholds: BreakerThresholds) -> Self {
        Self {
            key,
            state: BreakerState::Closed,
            manual_override: ManualOverride::None,
            failure_count: 0,
            consecutive_failures: 0,
            success_count: 0,
            consecutive_successes: 0,
            thresholds,
            last_failure_at: None,
            last_success_at: None,
            opened_at: None,
            last_failure_reason: None,
            last_failure_type: None,
            revision: 0,
            last_manual: None,
            probe_in_flight: None,
            probes_issued: 0,
        }
    }

    pub fn manual_revision(&self) -> u64 {
        self.last_manual.as_ref().map_or(0, |change| change.revision)
    }

    /// Decide whether a call may proceed at `now`.
    ///
    /// Performs the open → half_open transition when the timeout has elapsed,
    /// and claims the probe slot when admitting in half_open.
    pub fn admit(&mut self, now: DateTime<Utc>) -> (Admission, Option<Transition>) {
        if let ManualOverride::Disabled { reason } = &self.manual_override {
            let reason = reason
                .clone()
                .unwrap_or_else(|| "circuit manually disabled".to_string());
            return (
                Admission::Blocked {
                    reason,
                    retry_after_seconds: None,
                },
                None,
            );
        }

        let mut transition = None;

        if self.state == BreakerState::Open {
            let remaining_ms = self.open_remaining_ms(now);
            if remaining_ms > 0 {
                let retry_after = (remaining_ms as u64).div_ceil(1000);
                return (
                    Admission::Blocked {
                        reason: format!("circuit open, retry after {retry_after}s"),
                        retry_after_seconds: Some(retry_after),
                    },
                    None,
                );
            }
            transition = Some(self.enter(BreakerState::HalfOpen));
            self.opened_at = None;
            self.consecutive_successes = 0;
            self.probe_in_flight = None;
            self.revision += 1;
        }

        if self.state == BreakerState::Closed {
            return (Admission::Admitted { probe: None }, transition);
        }

        if self.probe_in_flight.is_some() {
            return (
                Admission::Blocked {
                    reason: "circuit half-open, probe in flight".to_string(),
                    retry_after_seconds: None,
                },
                transition,
            );
        }

        self.probes_issued += 1;
        let ticket = ProbeTicket(self.probes_issued);
        self.probe_in_flight = Some(ticket);
        (Admission::Admitted { probe: Some(ticket) }, transition)
    }

    /// Apply a call outcome observed at `now`. `probe` is the ticket the call
    /// was admitted with, if any.
    ///
    /// While half-open only the holder of the current ticket moves the state.
    /// Any other result is late: it lands in the lifetime counters and
    /// timestamps and nothing else, the same as a result arriving while open.
    pub fn record_outcome(
        &mut self,
        outcome: &CallOutcome,
        probe: Option<ProbeTicket>,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        self.revision += 1;
        let resolves_probe = probe.is_some() && probe == self.probe_in_flight;
        if resolves_probe {
            self.probe_in_flight = None;
        }
        match outcome {
            CallOutcome::Success => self.on_success(resolves_probe, now),
            CallOutcome::Failure {
                failure_type,
                reason,
            } => self.on_failure(*failure_type, reason.clone(), resolves_probe, now),
        }
    }

    fn on_success(&mut self, resolves_probe: bool, now: DateTime<Utc>) -> Option<Transition> {
        self.success_count = self.success_count.saturating_add(1);
        self.last_success_at = Some(now);

        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures = 0;
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                None
            }
            BreakerState::HalfOpen if resolves_probe => {
                self.consecutive_failures = 0;
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                if self.consecutive_successes >= self.thresholds.success_threshold {
                    self.consecutive_successes = 0;
                    Some(self.enter(BreakerState::Closed))
                } else {
                    None
                }
            }
            // Late: admitted before the trip, or not the current trial call
            BreakerState::HalfOpen | BreakerState::Open => None,
        }
    }

    fn on_failure(
        &mut self,
        failure_type: FailureType,
        reason: Option<String>,
        resolves_probe: bool,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);
        self.last_failure_reason = reason;
        self.last_failure_type = Some(failure_type);

        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.consecutive_successes = 0;
                if self.consecutive_failures >= self.thresholds.failure_threshold {
                    self.opened_at = Some(now);
                    Some(self.enter(BreakerState::Open))
                } else {
                    None
                }
            }
            BreakerState::HalfOpen if resolves_probe => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.consecutive_successes = 0;
                self.opened_at = Some(now);
                Some(self.enter(BreakerState::Open))
            }
            BreakerState::HalfOpen | BreakerState::Open => None,
        }
    }

    /// Apply an administrative action. `reason` is kept as the audit trail:
    /// in `disabled_reason` for a disable, in `last_failure_reason` otherwise.
    pub fn apply_manual(&mut self, action: ManualAction, reason: Option<String>) -> Option<Transition> {
        let change = ManualChange {
            revision: self.manual_revision() + 1,
            action,
            reason,
        };
        self.replay_manual(change)
    }

    /// Apply an administrative change, keeping its revision. Used directly
    /// when the change was made by another process sharing the stored row.
    pub fn replay_manual(&mut self, change: ManualChange) -> Option<Transition> {
        self.revision += 1;
        let reason = change.reason.clone();
        let action = change.action;
        self.last_manual = Some(change);
        match action {
            ManualAction::Disable => {
                self.manual_override = ManualOverride::Disabled { reason };
                None
            }
            ManualAction::Enable => {
                self.manual_override = ManualOverride::None;
                if let Some(reason) = reason {
                    self.last_failure_reason = Some(format!("manual enable: {reason}"));
                }
                None
            }
            ManualAction::Reset => {
                let from = self.state;
                self.state = BreakerState::Closed;
                self.failure_count = 0;
                self.consecutive_failures = 0;
                self.success_count = 0;
                self.consecutive_successes = 0;
                self.last_failure_at = None;
                self.last_success_at = None;
                self.opened_at = None;
                self.last_failure_type = None;
                self.last_failure_reason = reason.map(|reason| format!("manual reset: {reason}"));
                self.probe_in_flight = None;
                (from != BreakerState::Closed).then_some(Transition {
                    from,
                    to: BreakerState::Closed,
                })
            }
        }
    }

    /// Release the half-open slot held by `ticket` without recording an
    /// outcome. A ticket that no longer holds the slot releases nothing.
    pub fn release_probe(&mut self, ticket: ProbeTicket) -> bool {
        if self.probe_in_flight == Some(ticket) {
            self.probe_in_flight = None;
            true
        } else {
            false
        }
    }

    /// Carry the ticket sequence of the record this one replaces, so
    /// tickets issued before the swap never match a later one.
    pub fn continue_tickets_from(&mut self, previous: &CircuitBreakerRecord) {
        self.probes_issued = self.probes_issued.max(previous.probes_issued);
    }

    pub fn reconfigure(&mut self, thresholds: BreakerThresholds) {
        self.thresholds = thresholds;
        self.revision += 1;
    }

    /// Check the record's structural invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.consecutive_failures > self.failure_count {
            return Err(format!(
                "consecutive_failures ({}) exceeds failure_count ({})",
                self.consecutive_failures, self.failure_count
            ));
        }
        if self.consecutive_successes > self.success_count {
            return Err(format!(
                "consecutive_successes ({}) exceeds success_count ({})",
                self.consecutive_successes, self.success_count
            ));
        }
        if self.opened_at.is_some() != (self.state == BreakerState::Open) {
            return Err(format!(
                "opened_at {:?} inconsistent with state {}",
                self.opened_at, self.state
            ));
        }
        if self.thresholds.failure_threshold == 0 || self.thresholds.success_threshold == 0 {
            return Err("thresholds must be at least 1".to_string());
        }
        if self.probe_in_flight.is_some() && self.state != BreakerState::HalfOpen {
            return Err(format!("probe in flight while {}", self.state));
        }
        Ok(())
    }

    /// Milliseconds left before an open breaker may probe (0 once elapsed)
    fn open_remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        let Some(opened_at) = self.opened_at else {
            return 0;
        };
        let timeout_ms = i64::try_from(self.thresholds.timeout_seconds)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000);
        let elapsed_ms = (now - opened_at).num_milliseconds();
        timeout_ms.saturating_sub(elapsed_ms).max(0)
    }

    fn enter(&mut self, to: BreakerState) -> Transition {
        let from = self.state;
        self.state = to;
        Transition { from, to }
    }

    /// Administrative view of the record at `now`
    pub fn status(&self, now: DateTime<Utc>) -> CircuitBreakerStatus {
        let retry_after_seconds = (self.state == BreakerState::Open)
            .then(|| (self.open_remaining_ms(now) as u64).div_ceil(1000));
        CircuitBreakerStatus {
            api_config_id: self.key.api_config_id,
            provider: self.key.provider.clone(),
            state: self.state,
            manually_disabled: self.manual_override.is_disabled(),
            disabled_reason: self.manual_override.reason().map(str::to_string),
            failure_count: self.failure_count,
            consecutive_failures: self.consecutive_failures,
            success_count: self.success_count,
            consecutive_successes: self.consecutive_successes,
            failure_threshold: self.thresholds.failure_threshold,
            success_threshold: self.thresholds.success_threshold,
            timeout_seconds: self.thresholds.timeout_seconds,
            last_failure_at: self.last_failure_at,
            last_success_at: self.last_success_at,
            opened_at: self.opened_at,
            last_failure_reason: self.last_failure_reason.clone(),
            last_failure_type: self.last_failure_type,
            retry_after_seconds,
        }
    }
}

/// Summary of a single circuit breaker's state and configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStatus {
    pub api_config_id: Uuid,
    pub provider: String,
    pub state: BreakerState,
    pub manually_disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    pub failure_count: u32,
    pub consecutive_failures: u32,
    pub success_count: u32,
    pub consecutive_successes: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_seconds: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
    pub last_failure_type: Option<FailureType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 10, 9, 0, 0).unwrap()
    }

    fn record(failure: u32, success: u32, timeout: u64) -> CircuitBreakerRecord {
        CircuitBreakerRecord::new(
            BreakerKey::new(Uuid::new_v4(), "newsapi"),
            BreakerThresholds {
                failure_threshold: failure,
                success_threshold: success,
                timeout_seconds: timeout,
            },
        )
    }

    fn fail() -> CallOutcome {
        CallOutcome::failure(FailureType::ServerError, "upstream 503")
    }

    #[test]
    fn opens_exactly_at_failure_threshold() {
        let mut breaker = record(3, 2, 60);
        let now = start();

        assert_eq!(breaker.record_outcome(&fail(), None, now), None);
        assert_eq!(breaker.record_outcome(&fail(), None, now), None);
        assert_eq!(breaker.state, BreakerState::Closed);

        let transition = breaker.record_outcome(&fail(), None, now);
        assert_eq!(
            transition,
            Some(Transition {
                from: BreakerState::Closed,
                to: BreakerState::Open
            })
        );
        assert_eq!(breaker.opened_at, Some(now));
        assert_eq!(breaker.last_failure_type, Some(FailureType::ServerError));
        assert_eq!(breaker.last_failure_reason.as_deref(), Some("upstream 503"));
        breaker.check_invariants().unwrap();
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let mut breaker = record(3, 2, 60);
        let now = start();

        breaker.record_outcome(&fail(), None, now);
        breaker.record_outcome(&fail(), None, now);
        breaker.record_outcome(&CallOutcome::Success, None, now);
        breaker.record_outcome(&fail(), None, now);
        breaker.record_outcome(&fail(), None, now);

        assert_eq!(breaker.state, BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures, 2);
        assert_eq!(breaker.failure_count, 4);
        assert_eq!(breaker.success_count, 1);
        assert_eq!(breaker.consecutive_successes, 0);
    }

    #[test]
    fn open_blocks_until_timeout_with_remaining_time() {
        let mut breaker = record(1, 1, 60);
        let opened = start();
        breaker.record_outcome(&fail(), None, opened);

        let (admission, transition) = breaker.admit(opened + Duration::seconds(15));
        assert_eq!(transition, None);
        assert_eq!(
            admission,
            Admission::Blocked {
                reason: "circuit open, retry after 45s".to_string(),
                retry_after_seconds: Some(45),
            }
        );

        let (admission, _) = breaker.admit(opened + Duration::milliseconds(59_500));
        assert_eq!(admission.block_reason(), Some("circuit open, retry after 1s"));
        assert_eq!(breaker.state, BreakerState::Open);
    }

    #[test]
    fn timeout_elapsed_admits_single_probe() {
        let mut breaker = record(1, 2, 60);
        let opened = start();
        breaker.record_outcome(&fail(), None, opened);

        let (first, transition) = breaker.admit(opened + Duration::seconds(60));
        assert!(first.probe().is_some());
        assert_eq!(
            transition,
            Some(Transition {
                from: BreakerState::Open,
                to: BreakerState::HalfOpen
            })
        );
        assert_eq!(breaker.opened_at, None);

        let (second, transition) = breaker.admit(opened + Duration::seconds(61));
        assert!(!second.is_allowed());
        assert_eq!(transition, None);
        breaker.check_invariants().unwrap();
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_timestamp() {
        let mut breaker = record(1, 3, 60);
        let opened = start();
        breaker.record_outcome(&fail(), None, opened);

        let probe_at = opened + Duration::seconds(61);
        let ticket = breaker.admit(probe_at).0.probe();
        breaker.record_outcome(&CallOutcome::Success, ticket, probe_at);
        let ticket = breaker.admit(probe_at).0.probe();
        breaker.record_outcome(&CallOutcome::Success, ticket, probe_at);
        assert_eq!(breaker.consecutive_successes, 2);

        let failed_at = probe_at + Duration::seconds(5);
        let ticket = breaker.admit(failed_at).0.probe();
        let transition = breaker.record_outcome(&fail(), ticket, failed_at);

        assert_eq!(transition.map(|t| t.to), Some(BreakerState::Open));
        assert_eq!(breaker.opened_at, Some(failed_at));
        assert_eq!(breaker.consecutive_successes, 0);
        assert!(breaker.probe_in_flight.is_none());
        breaker.check_invariants().unwrap();
    }

    #[test]
    fn full_recovery_scenario() {
        let mut breaker = record(3, 2, 60);
        let t0 = start();

        for _ in 0..3 {
            breaker.admit(t0);
            breaker.record_outcome(&fail(), None, t0);
        }
        assert_eq!(breaker.state, BreakerState::Open);

        for secs in [1, 30, 59] {
            let (admission, _) = breaker.admit(t0 + Duration::seconds(secs));
            assert!(!admission.is_allowed());
        }

        let t61 = t0 + Duration::seconds(61);
        let ticket = breaker.admit(t61).0.probe();
        assert!(ticket.is_some());
        assert_eq!(breaker.state, BreakerState::HalfOpen);
        breaker.record_outcome(&CallOutcome::Success, ticket, t61);
        assert_eq!(breaker.consecutive_successes, 1);
        assert_eq!(breaker.state, BreakerState::HalfOpen);

        let ticket = breaker.admit(t61).0.probe();
        assert!(ticket.is_some());
        let transition = breaker.record_outcome(&CallOutcome::Success, ticket, t61);
        assert_eq!(transition.map(|t| t.to), Some(BreakerState::Closed));
        assert_eq!(breaker.consecutive_failures, 0);
        assert_eq!(breaker.consecutive_successes, 0);
        // lifetime totals survive a close
        assert_eq!(breaker.failure_count, 3);
        assert_eq!(breaker.success_count, 2);
        breaker.check_invariants().unwrap();
    }

    #[test]
    fn manual_disable_blocks_every_state() {
        let t0 = start();
        let reason = Some("provider contract paused".to_string());

        let mut closed = record(1, 1, 60);
        closed.apply_manual(ManualAction::Disable, reason.clone());
        assert_eq!(
            closed.admit(t0).0.block_reason(),
            Some("provider contract paused")
        );

        let mut open = record(1, 1, 60);
        open.record_outcome(&fail(), None, t0);
        open.apply_manual(ManualAction::Disable, None);
        let (admission, transition) = open.admit(t0 + Duration::seconds(120));
        assert_eq!(admission.block_reason(), Some("circuit manually disabled"));
        assert_eq!(transition, None);
        assert_eq!(open.state, BreakerState::Open);

        let mut half_open = record(1, 1, 60);
        half_open.record_outcome(&fail(), None, t0);
        let ticket = half_open.admit(t0 + Duration::seconds(60)).0.probe().unwrap();
        assert!(half_open.release_probe(ticket));
        half_open.apply_manual(ManualAction::Disable, reason);
        assert!(!half_open.admit(t0 + Duration::seconds(61)).0.is_allowed());
    }

    #[test]
    fn enable_keeps_computed_state() {
        let t0 = start();
        let mut breaker = record(1, 1, 60);
        breaker.record_outcome(&fail(), None, t0);
        breaker.apply_manual(ManualAction::Disable, Some("maintenance".to_string()));
        breaker.apply_manual(ManualAction::Enable, Some("vendor confirmed fix".to_string()));

        assert_eq!(breaker.state, BreakerState::Open);
        assert_eq!(breaker.manual_override, ManualOverride::None);
        assert_eq!(breaker.opened_at, Some(t0));
        assert_eq!(
            breaker.last_failure_reason.as_deref(),
            Some("manual enable: vendor confirmed fix")
        );
        assert_eq!(breaker.manual_revision(), 2);
    }

    #[test]
    fn enable_without_reason_keeps_last_failure() {
        let t0 = start();
        let mut breaker = record(1, 1, 60);
        breaker.record_outcome(&fail(), None, t0);
        breaker.apply_manual(ManualAction::Enable, None);

        assert_eq!(breaker.last_failure_reason.as_deref(), Some("upstream 503"));
    }

    #[test]
    fn replayed_change_keeps_its_revision() {
        let key = BreakerKey::new(Uuid::new_v4(), "gnews");
        let mut writer = CircuitBreakerRecord::new(key.clone(), BreakerThresholds::default());
        writer.apply_manual(ManualAction::Disable, Some("contract review".to_string()));
        writer.apply_manual(ManualAction::Disable, Some("contract review".to_string()));

        let mut reader = CircuitBreakerRecord::new(key, BreakerThresholds::default());
        let change = writer.last_manual.clone().unwrap();
        reader.replay_manual(change);

        assert_eq!(reader.manual_revision(), 2);
        assert_eq!(reader.manual_override.reason(), Some("contract review"));
        assert_eq!(reader.revision, 1);
    }

    #[test]
    fn reset_clears_counters_but_not_override() {
        let t0 = start();
        let mut breaker = record(2, 1, 60);
        breaker.record_outcome(&fail(), None, t0);
        breaker.record_outcome(&fail(), None, t0);
        breaker.apply_manual(ManualAction::Disable, None);

        let transition = breaker.apply_manual(ManualAction::Reset, Some("ops ticket 42".to_string()));

        assert_eq!(transition.map(|t| t.to), Some(BreakerState::Closed));
        assert_eq!(breaker.failure_count, 0);
        assert_eq!(breaker.consecutive_failures, 0);
        assert_eq!(breaker.opened_at, None);
        assert_eq!(breaker.last_failure_at, None);
        assert_eq!(breaker.last_failure_reason.as_deref(), Some("manual reset: ops ticket 42"));
        assert!(breaker.manual_override.is_disabled());
        breaker.check_invariants().unwrap();
    }

    #[test]
    fn late_outcomes_while_open_do_not_move_state() {
        let t0 = start();
        let mut breaker = record(1, 1, 60);
        breaker.record_outcome(&fail(), None, t0);

        let later = t0 + Duration::seconds(30);
        assert_eq!(breaker.record_outcome(&CallOutcome::Success, None, later), None);
        assert_eq!(breaker.record_outcome(&fail(), None, later), None);

        assert_eq!(breaker.state, BreakerState::Open);
        assert_eq!(breaker.opened_at, Some(t0));
        breaker.check_invariants().unwrap();
    }

    #[test]
    fn released_probe_frees_the_slot() {
        let t0 = start();
        let mut breaker = record(1, 1, 10);
        breaker.record_outcome(&fail(), None, t0);
        let revision = breaker.revision;

        let ticket = breaker.admit(t0 + Duration::seconds(10)).0.probe().unwrap();
        assert!(breaker.release_probe(ticket));
        assert!(breaker.admit(t0 + Duration::seconds(11)).0.is_allowed());
        assert_eq!(breaker.state, BreakerState::HalfOpen);
        assert_eq!(breaker.failure_count, 1);
        assert_eq!(breaker.revision, revision + 1);
    }

    #[test]
    fn call_admitted_while_closed_cannot_resolve_half_open() {
        let t0 = start();
        let mut breaker = record(3, 1, 60);
        let (straggler, _) = breaker.admit(t0);
        assert_eq!(straggler.probe(), None);
        for _ in 0..3 {
            breaker.record_outcome(&fail(), None, t0);
        }

        let t61 = t0 + Duration::seconds(61);
        let ticket = breaker.admit(t61).0.probe();
        assert!(ticket.is_some());

        // The call admitted before the trip finishes now
        let transition = breaker.record_outcome(&CallOutcome::Success, straggler.probe(), t61);
        assert_eq!(transition, None);
        assert_eq!(breaker.state, BreakerState::HalfOpen);
        assert_eq!(breaker.consecutive_successes, 0);
        assert_eq!(breaker.success_count, 1);
        assert_eq!(breaker.last_success_at, Some(t61));
        assert_eq!(breaker.probe_in_flight, ticket);
        assert!(!breaker.admit(t61).0.is_allowed());

        let late_failure = breaker.record_outcome(&fail(), None, t61);
        assert_eq!(late_failure, None);
        assert_eq!(breaker.state, BreakerState::HalfOpen);
        assert_eq!(breaker.failure_count, 4);
        breaker.check_invariants().unwrap();

        let transition = breaker.record_outcome(&CallOutcome::Success, ticket, t61);
        assert_eq!(transition.map(|t| t.to), Some(BreakerState::Closed));
        breaker.check_invariants().unwrap();
    }

    #[test]
    fn superseded_ticket_neither_releases_nor_resolves() {
        let t0 = start();
        let mut breaker = record(1, 1, 10);
        breaker.record_outcome(&fail(), None, t0);

        let first = breaker.admit(t0 + Duration::seconds(10)).0.probe().unwrap();
        breaker.record_outcome(&fail(), Some(first), t0 + Duration::seconds(10));
        assert_eq!(breaker.state, BreakerState::Open);

        let second = breaker.admit(t0 + Duration::seconds(20)).0.probe().unwrap();
        assert_ne!(first, second);

        assert!(!breaker.release_probe(first));
        assert_eq!(breaker.probe_in_flight, Some(second));
        assert!(!breaker.admit(t0 + Duration::seconds(21)).0.is_allowed());

        let transition =
            breaker.record_outcome(&CallOutcome::Success, Some(first), t0 + Duration::seconds(21));
        assert_eq!(transition, None);
        assert_eq!(breaker.state, BreakerState::HalfOpen);
        assert_eq!(breaker.probe_in_flight, Some(second));
    }

    #[test]
    fn invariant_check_detects_desynchronized_counters() {
        let mut breaker = record(3, 2, 60);
        breaker.consecutive_failures = 2;
        assert!(breaker.check_invariants().is_err());

        let mut breaker = record(3, 2, 60);
        breaker.state = BreakerState::Open;
        assert!(breaker.check_invariants().is_err());
    }

    #[test]
    fn classifies_failures_from_status() {
        assert_eq!(FailureType::classify(None), FailureType::NetworkError);
        assert_eq!(FailureType::classify(Some(429)), FailureType::RateLimited);
        assert_eq!(FailureType::classify(Some(504)), FailureType::Timeout);
        assert_eq!(FailureType::classify(Some(403)), FailureType::AuthError);
        assert_eq!(FailureType::classify(Some(404)), FailureType::ClientError);
        assert_eq!(FailureType::classify(Some(502)), FailureType::ServerError);
        assert_eq!("rate_limited".parse::<FailureType>(), Ok(FailureType::RateLimited));
    }

    #[test]
    fn status_reports_retry_after_when_open() {
        let t0 = start();
        let mut breaker = record(1, 1, 60);
        breaker.record_outcome(&fail(), None, t0);

        let status = breaker.status(t0 + Duration::seconds(20));
        assert_eq!(status.state, BreakerState::Open);
        assert_eq!(status.retry_after_seconds, Some(40));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "open");
        assert_eq!(json["failureThreshold"], 1);
    }
}
