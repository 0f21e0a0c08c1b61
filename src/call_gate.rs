//! # Call Gate
//!
//! The seam the job scheduler uses around each provider call:
//!
//! ```text
//! gate.admit(&run, key).await → Proceed(permit) | Skip { reason }
//! ... caller performs the call ...
//! gate.complete(permit, entry) → ledger append → breaker outcome → persist
//! ```
//!
//! A permit dropped without `complete` records nothing. If it held the
//! half-open probe, the probe slot is released so the next admission can
//! try again.
//!
//! Several processes may share the breaker rows, e.g. a running service and
//! the admin CLI. Admission first reads the stored row and adopts any
//! administrative action this process has not seen yet, so a breaker
//! disabled from the CLI stops the service's next call.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::breaker::{
    Admission, BreakerKey, BreakerThresholds, CircuitBreakerRecord, CircuitBreakerRegistry,
    ManualAction, ProbeTicket,
};
use crate::error::{BreakerFault, CoreError, GuardError};
use crate::models::api_request_log::Model as LedgerEntry;
use crate::models::job_run::Model as JobRun;
use crate::repositories::{CircuitBreakerRepository, NewApiRequest, RequestLedger};

/// Result of asking the gate for a call
#[derive(Debug)]
pub enum GateDecision {
    Proceed(CallPermit),
    /// Not an error: the breaker refused the call, retry on a later pass
    Skip {
        reason: String,
        retry_after_seconds: Option<u64>,
    },
}

/// Right to make one provider call on behalf of a job run
pub struct CallPermit {
    key: BreakerKey,
    business_id: uuid::Uuid,
    job_run_id: uuid::Uuid,
    probe: Option<ProbeTicket>,
    registry: Arc<CircuitBreakerRegistry>,
    resolved: bool,
}

impl CallPermit {
    pub fn key(&self) -> &BreakerKey {
        &self.key
    }

    /// Whether this call is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }
}

impl std::fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit")
            .field("key", &self.key)
            .field("business_id", &self.business_id)
            .field("job_run_id", &self.job_run_id)
            .field("probe", &self.probe)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.resolved
            && let Some(ticket) = self.probe
        {
            self.registry.abandon(&self.key, ticket);
        }
    }
}

/// What a completed call left behind
#[derive(Debug, Clone)]
pub struct CompletedCall {
    pub entry: LedgerEntry,
    pub breaker: CircuitBreakerRecord,
    /// False when a newer breaker row was already stored
    pub persisted: bool,
}

/// Attempts at persisting an administrative action before giving up
const MANUAL_WRITE_ATTEMPTS: u32 = 3;

/// Orchestrates admission, ledger writes and breaker persistence
pub struct CallGate {
    registry: Arc<CircuitBreakerRegistry>,
    ledger: RequestLedger,
    store: CircuitBreakerRepository,
}

impl CallGate {
    pub fn new(
        registry: Arc<CircuitBreakerRegistry>,
        ledger: RequestLedger,
        store: CircuitBreakerRepository,
    ) -> Self {
        Self {
            registry,
            ledger,
            store,
        }
    }

    /// Load persisted breaker records into the registry
    pub async fn hydrate(&self) -> Result<usize, CoreError> {
        let records = self.store.load_all().await?;
        let loaded = records.len();
        self.registry.hydrate(records);
        debug!(loaded, "Circuit breakers hydrated from storage");
        Ok(loaded)
    }

    /// Ask whether `run` may call the provider behind `key`.
    ///
    /// A run without a business is refused before the breaker is consulted.
    pub async fn admit(&self, run: &JobRun, key: BreakerKey) -> Result<GateDecision, CoreError> {
        let Some(business_id) = run.business_id else {
            warn!(job_run_id = %run.id, breaker = %key, "Refused provider call for orphaned job run");
            return Err(GuardError::MissingTenant { business_id: None }.into());
        };

        self.adopt_stored_manual(&key).await?;

        match self.registry.can_admit(&key) {
            Admission::Admitted { probe } => Ok(GateDecision::Proceed(CallPermit {
                key,
                business_id,
                job_run_id: run.id,
                probe,
                registry: Arc::clone(&self.registry),
                resolved: false,
            })),
            Admission::Blocked {
                reason,
                retry_after_seconds,
            } => Ok(GateDecision::Skip {
                reason,
                retry_after_seconds,
            }),
        }
    }

    /// Record a finished call.
    ///
    /// Tenant, job run and provider context are taken from the permit. An
    /// entry that fails validation is not written and its permit is dropped
    /// unresolved, so the breaker sees nothing. The same holds when the
    /// breaker rejects the outcome as an invariant fault.
    pub async fn complete(
        &self,
        mut permit: CallPermit,
        mut entry: NewApiRequest,
    ) -> Result<CompletedCall, CoreError> {
        entry.provider = permit.key.provider.clone();
        entry.client_id = Some(permit.business_id);
        entry.job_run_id = Some(permit.job_run_id);

        let outcome = entry.outcome();
        let written = self.ledger.append(entry).await?;

        let mut breaker = self
            .registry
            .record_outcome(&permit.key, &outcome, permit.probe)?;
        permit.resolved = true;
        let mut persisted = self.store.save(&breaker).await?;
        if !persisted && let Some(merged) = self.adopt_stored_manual(&permit.key).await? {
            persisted = self.store.save(&merged).await?;
            breaker = merged;
        }

        Ok(CompletedCall {
            entry: written,
            breaker,
            persisted,
        })
    }

    /// Operator override, persisted immediately.
    ///
    /// When another process wrote the row since this one last read it, the
    /// stored record replaces the live one and the action is applied again
    /// on top of it.
    pub async fn manual_control(
        &self,
        key: &BreakerKey,
        action: ManualAction,
        reason: Option<String>,
    ) -> Result<CircuitBreakerRecord, CoreError> {
        self.adopt_stored_manual(key).await?;
        for attempt in 1..=MANUAL_WRITE_ATTEMPTS {
            let record = self.registry.manual_control(key, action, reason.clone());
            if self.store.save(&record).await? {
                return Ok(record);
            }
            debug!(breaker = %key, attempt, "Manual control lost a write race, reloading");
            if let Some(stored) = self.store.load(key).await? {
                self.registry.reload(stored);
            }
        }
        Err(BreakerFault::WriteConflict {
            key: key.to_string(),
            attempts: MANUAL_WRITE_ATTEMPTS,
        }
        .into())
    }

    /// Replace thresholds on a live breaker, persisted immediately
    pub async fn reconfigure(
        &self,
        key: &BreakerKey,
        thresholds: BreakerThresholds,
    ) -> Result<CircuitBreakerRecord, CoreError> {
        let record = self.registry.reconfigure(key, thresholds)?;
        self.store.save(&record).await?;
        Ok(record)
    }

    /// Apply an administrative action stored by another process, if any.
    async fn adopt_stored_manual(
        &self,
        key: &BreakerKey,
    ) -> Result<Option<CircuitBreakerRecord>, CoreError> {
        let stored = match self.store.load(key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(None),
            Err(CoreError::Breaker(fault)) => {
                warn!(breaker = %key, error = %fault, "Ignoring corrupt stored circuit breaker");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        Ok(self.registry.adopt_manual(&stored))
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &RequestLedger {
        &self.ledger
    }
}
