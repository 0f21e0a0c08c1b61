//! # Usage Aggregator
//!
//! Read-only statistics over the request ledger. Every function here
//! tolerates an empty ledger and never divides by zero.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::api_request_log::Model as LedgerEntry;
use crate::repositories::RequestLedger;

/// Span never drops below one second when normalizing to requests per hour
const MIN_SPAN_SECONDS: f64 = 1.0;

/// Time range a statistics query covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsWindow {
    /// The whole ledger; the span runs from the earliest entry to now
    All,
    /// The trailing `n` hours up to now. A window reaching past the earliest
    /// representable time covers the whole ledger.
    LastHours(u32),
    /// `[start, end]`
    Between {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl StatsWindow {
    pub fn last_hours(hours: u32) -> Self {
        StatsWindow::LastHours(hours)
    }

    /// Concrete bounds at `now`
    pub fn bounds(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, DateTime<Utc>) {
        match *self {
            StatsWindow::All => (None, now),
            StatsWindow::LastHours(hours) => {
                let start = now.checked_sub_signed(Duration::hours(i64::from(hours)));
                (start, now)
            }
            StatsWindow::Between { start, end } => (Some(start), end),
        }
    }
}

/// Aggregate statistics for a set of ledger entries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// `successful / total`, 0 for an empty set
    pub success_rate: f64,
    /// Mean over entries that recorded a latency, 0 when none did
    pub avg_response_time_ms: f64,
    pub total_results: u64,
    pub errors_by_type: BTreeMap<String, u64>,
    pub requests_per_hour: f64,
}

impl UsageStats {
    pub fn empty() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            success_rate: 0.0,
            avg_response_time_ms: 0.0,
            total_results: 0,
            errors_by_type: BTreeMap::new(),
            requests_per_hour: 0.0,
        }
    }
}

/// One failed call, as shown to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSummary {
    pub id: Uuid,
    pub provider: String,
    pub endpoint: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub client_id: Option<Uuid>,
    pub client_name: Option<String>,
    pub job_run_id: Option<Uuid>,
    pub status_code: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for FailureSummary {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            provider: entry.provider,
            endpoint: entry.endpoint,
            error_type: entry.error_type,
            error_message: entry.error_message,
            client_id: entry.client_id,
            client_name: entry.client_name,
            job_run_id: entry.job_run_id,
            status_code: entry.status_code,
            created_at: entry.created_at.with_timezone(&Utc),
        }
    }
}

/// Compute statistics over `entries`.
///
/// `start = None` means unwindowed: the span starts at the earliest entry.
pub fn compute_stats<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
) -> UsageStats {
    let mut stats = UsageStats::empty();
    let mut latency_sum: i64 = 0;
    let mut latency_samples: u64 = 0;
    let mut earliest: Option<DateTime<Utc>> = None;

    for entry in entries {
        stats.total_requests += 1;
        if entry.success {
            stats.successful_requests += 1;
        } else {
            stats.failed_requests += 1;
            let error_type = entry.error_type.as_deref().unwrap_or("unknown");
            *stats.errors_by_type.entry(error_type.to_string()).or_default() += 1;
        }
        if let Some(ms) = entry.response_time_ms {
            latency_sum = latency_sum.saturating_add(ms);
            latency_samples += 1;
        }
        stats.total_results += u64::try_from(entry.results_count).unwrap_or(0);

        let created_at = entry.created_at.with_timezone(&Utc);
        earliest = Some(earliest.map_or(created_at, |current| current.min(created_at)));
    }

    if stats.total_requests == 0 {
        return stats;
    }

    stats.success_rate = stats.successful_requests as f64 / stats.total_requests as f64;
    if latency_samples > 0 {
        stats.avg_response_time_ms = latency_sum as f64 / latency_samples as f64;
    }

    let span_start = start.or(earliest).unwrap_or(end);
    let span_seconds = ((end - span_start).num_milliseconds() as f64 / 1000.0).max(MIN_SPAN_SECONDS);
    stats.requests_per_hour = stats.total_requests as f64 * 3600.0 / span_seconds;

    stats
}

/// Statistics queries over the request ledger
#[derive(Clone)]
pub struct UsageAggregator {
    ledger: RequestLedger,
}

impl UsageAggregator {
    pub fn new(ledger: RequestLedger) -> Self {
        Self { ledger }
    }

    /// Statistics for one provider
    pub async fn stats_for(
        &self,
        provider: &str,
        window: StatsWindow,
    ) -> Result<UsageStats, LedgerError> {
        let (start, end) = window.bounds(self.ledger.clock().now());
        let entries = self.ledger.entries_between(Some(provider), start, end).await?;
        Ok(compute_stats(&entries, start, end))
    }

    /// Statistics grouped by provider
    pub async fn stats_by_provider(
        &self,
        window: StatsWindow,
    ) -> Result<BTreeMap<String, UsageStats>, LedgerError> {
        let (start, end) = window.bounds(self.ledger.clock().now());
        let entries = self.ledger.entries_between(None, start, end).await?;

        let mut grouped: BTreeMap<&str, Vec<&LedgerEntry>> = BTreeMap::new();
        for entry in &entries {
            grouped.entry(entry.provider.as_str()).or_default().push(entry);
        }

        Ok(grouped
            .into_iter()
            .map(|(provider, group)| {
                (provider.to_string(), compute_stats(group, start, end))
            })
            .collect())
    }

    /// Statistics across every provider
    pub async fn global_stats(&self, window: StatsWindow) -> Result<UsageStats, LedgerError> {
        let (start, end) = window.bounds(self.ledger.clock().now());
        let entries = self.ledger.entries_between(None, start, end).await?;
        Ok(compute_stats(&entries, start, end))
    }

    /// Most recent failures, newest first. `None` uses the configured limit.
    pub async fn recent_failures(
        &self,
        limit: Option<u64>,
    ) -> Result<Vec<FailureSummary>, LedgerError> {
        let limit = limit.unwrap_or(self.ledger.config().recent_failures_limit);
        let rows = self.ledger.recent_failures(limit).await?;
        Ok(rows.into_iter().map(FailureSummary::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 10, 9, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn entry(success: bool, latency: Option<i64>, results: i32, seconds: i64) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            provider: "newsapi".to_string(),
            endpoint: None,
            method: "GET".to_string(),
            client_id: None,
            client_name: None,
            job_run_id: None,
            status_code: Some(if success { 200 } else { 503 }),
            success,
            response_time_ms: latency,
            results_count: results,
            error_message: None,
            error_type: (!success).then(|| "server_error".to_string()),
            rate_limit_remaining: None,
            rate_limit_reset: None,
            created_at: at(seconds).fixed_offset(),
        }
    }

    #[test]
    fn empty_set_has_zero_rates() {
        let stats = compute_stats(&[], Some(at(0)), at(3600));
        assert_eq!(stats, UsageStats::empty());
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.avg_response_time_ms, 0.0);
    }

    #[test]
    fn aggregates_counts_and_latency() {
        let entries = vec![
            entry(true, Some(100), 10, 0),
            entry(true, Some(300), 5, 60),
            entry(false, None, 0, 120),
            entry(false, Some(200), 0, 180),
        ];
        let stats = compute_stats(&entries, Some(at(0)), at(7200));

        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.failed_requests, 2);
        assert_eq!(stats.success_rate, 0.5);
        assert_eq!(stats.avg_response_time_ms, 200.0);
        assert_eq!(stats.total_results, 15);
        assert_eq!(stats.errors_by_type.get("server_error"), Some(&2));
        assert_eq!(stats.requests_per_hour, 2.0);
    }

    #[test]
    fn sub_second_window_is_finite() {
        let entries = vec![entry(true, Some(5), 1, 0), entry(true, Some(5), 1, 0)];
        let end = at(0) + Duration::milliseconds(200);
        let stats = compute_stats(&entries, Some(at(0)), end);
        assert!(stats.requests_per_hour.is_finite());
        assert_eq!(stats.requests_per_hour, 7200.0);
    }

    #[test]
    fn unwindowed_span_starts_at_earliest_entry() {
        let entries = vec![entry(true, None, 0, 1800), entry(true, None, 0, 3600)];
        let stats = compute_stats(&entries, None, at(5400));
        assert_eq!(stats.requests_per_hour, 2.0);
    }

    #[test]
    fn missing_error_type_counts_as_unknown() {
        let mut failed = entry(false, None, 0, 0);
        failed.error_type = None;
        let stats = compute_stats([&failed], Some(at(0)), at(10));
        assert_eq!(stats.errors_by_type.get("unknown"), Some(&1));
    }

    #[test]
    fn window_bounds() {
        let now = at(7200);
        assert_eq!(StatsWindow::All.bounds(now), (None, now));
        assert_eq!(StatsWindow::last_hours(2).bounds(now), (Some(at(0)), now));
    }

    #[test]
    fn oversized_window_falls_back_to_whole_ledger() {
        let now = Utc::now();
        assert_eq!(StatsWindow::last_hours(u32::MAX).bounds(now), (None, now));

        let stats = compute_stats(&[entry(true, None, 0, 0)], None, now);
        assert_eq!(stats.total_requests, 1);
    }
}
