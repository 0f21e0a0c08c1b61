mod test_utils;

use anyhow::Result;
use chrono::Duration;
use provider_resilience::clock::Clock;
use provider_resilience::config::LedgerConfig;
use provider_resilience::error::LedgerError;
use provider_resilience::models::ApiRequestLog;
use provider_resilience::repositories::{NewApiRequest, RequestLedger};
use sea_orm::{EntityTrait, PaginatorTrait};
use std::sync::Arc;
use test_utils::{manual_clock, setup_test_db, t0, test_ledger};
use uuid::Uuid;

#[tokio::test]
async fn append_assigns_id_and_timestamp() -> Result<()> {
    let db = setup_test_db().await?;
    let (_clock, shared) = manual_clock();
    let ledger = test_ledger(&db, shared);

    let entry = NewApiRequest {
        endpoint: Some("/v2/everything".to_string()),
        status_code: Some(200),
        response_time_ms: Some(412),
        results_count: 20,
        rate_limit_remaining: Some(98),
        ..NewApiRequest::succeeded("newsapi", "GET")
    };
    let written = ledger.append(entry).await?;

    assert_ne!(written.id, Uuid::nil());
    assert_eq!(written.created_at, t0().fixed_offset());
    assert_eq!(written.results_count, 20);
    assert_eq!(written.rate_limit_remaining, Some(98));
    assert!(written.success);
    assert!(written.error_type.is_none());

    let stored = ApiRequestLog::find_by_id(written.id).one(&db).await?;
    assert_eq!(stored, Some(written));
    Ok(())
}

#[tokio::test]
async fn invalid_entries_are_rejected_before_write() -> Result<()> {
    let db = setup_test_db().await?;
    let (_clock, shared) = manual_clock();
    let ledger = test_ledger(&db, shared);

    let negative = NewApiRequest {
        results_count: -3,
        ..NewApiRequest::succeeded("newsapi", "GET")
    };
    let err = ledger.append(negative).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Validation {
            field: "results_count",
            ..
        }
    ));

    let inconsistent = NewApiRequest {
        error_type: Some("timeout".to_string()),
        ..NewApiRequest::succeeded("newsapi", "GET")
    };
    assert!(ledger.append(inconsistent).await.unwrap_err().is_validation());

    let no_provider = NewApiRequest::succeeded("  ", "GET");
    assert!(ledger.append(no_provider).await.unwrap_err().is_validation());

    assert_eq!(ApiRequestLog::find().count(&db).await?, 0);
    Ok(())
}

#[tokio::test]
async fn long_error_messages_are_truncated() -> Result<()> {
    let db = setup_test_db().await?;
    let (_clock, shared) = manual_clock();
    let ledger = RequestLedger::new(
        Arc::new(db.clone()),
        LedgerConfig {
            error_message_max_chars: 64,
            ..Default::default()
        },
        shared,
    );

    let message = "upstream returned ümlaut-heavy garbage ".repeat(10);
    let written = ledger
        .append(NewApiRequest::failed("serpapi", "GET", Some(502), message))
        .await?;

    let stored = written.error_message.unwrap();
    assert_eq!(stored.chars().count(), 67);
    assert!(stored.ends_with("..."));
    assert_eq!(written.error_type.as_deref(), Some("server_error"));
    Ok(())
}

#[tokio::test]
async fn recent_failures_are_newest_first() -> Result<()> {
    let db = setup_test_db().await?;
    let (clock, shared) = manual_clock();
    let ledger = test_ledger(&db, shared);

    for (status, message) in [(500, "first"), (429, "second"), (401, "third")] {
        ledger
            .append(NewApiRequest::failed("gnews", "GET", Some(status), message))
            .await?;
        ledger.append(NewApiRequest::succeeded("gnews", "GET")).await?;
        clock.advance(Duration::seconds(30));
    }

    let failures = ledger.recent_failures(2).await?;
    let messages: Vec<_> = failures
        .iter()
        .map(|f| f.error_message.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(messages, vec!["third", "second"]);
    assert!(failures.iter().all(|f| !f.success));
    Ok(())
}

#[tokio::test]
async fn entries_are_readable_by_job_run_and_window() -> Result<()> {
    let db = setup_test_db().await?;
    let (clock, shared) = manual_clock();
    let ledger = test_ledger(&db, shared);
    let job_run_id = Uuid::new_v4();

    for provider in ["newsapi", "serpapi", "newsapi"] {
        ledger
            .append(NewApiRequest {
                job_run_id: Some(job_run_id),
                ..NewApiRequest::succeeded(provider, "GET")
            })
            .await?;
        clock.advance(Duration::minutes(10));
    }
    ledger.append(NewApiRequest::succeeded("newsapi", "GET")).await?;

    assert_eq!(ledger.for_job_run(job_run_id).await?.len(), 3);

    let window = ledger
        .entries_between(
            Some("newsapi"),
            Some(t0() + Duration::minutes(5)),
            clock.now(),
        )
        .await?;
    assert_eq!(window.len(), 2);
    assert!(window[0].created_at < window[1].created_at);
    Ok(())
}
