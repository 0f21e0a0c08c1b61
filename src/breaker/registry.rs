//! Per-key ownership of circuit breaker records.
//!
//! Each record lives behind its own mutex. The outer map lock is held only
//! long enough to find or create a slot, so breakers for different
//! (configuration, provider) keys never contend with each other. Admission
//! runs check-and-transition inside one critical section, which is what
//! limits half-open to a single outstanding probe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use metrics::counter;
use tracing::{debug, error, info, warn};

use super::state::{
    Admission, BreakerKey, BreakerState, BreakerThresholds, CallOutcome, CircuitBreakerRecord,
    ManualAction, ProbeTicket, Transition,
};
use crate::clock::SharedClock;
use crate::config::CircuitBreakerConfig;
use crate::error::BreakerFault;

type Slot = Arc<Mutex<CircuitBreakerRecord>>;

/// Owner of every breaker record in the process
pub struct CircuitBreakerRegistry {
    slots: Mutex<HashMap<BreakerKey, Slot>>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Decide whether a call for `key` may proceed. Never blocks on I/O.
    pub fn can_admit(&self, key: &BreakerKey) -> Admission {
        let slot = self.slot(key);
        let now = self.clock.now();

        let (admission, transition) = {
            let mut record = lock(&slot);
            record.admit(now)
        };

        if let Some(transition) = transition {
            log_transition(key, transition, "admission check");
        }
        if let Admission::Blocked { reason, .. } = &admission {
            counter!("circuit_breaker_blocked_total", "provider" => key.provider.clone())
                .increment(1);
            tracing::debug!(breaker = %key, reason = %reason, "Call blocked by circuit breaker");
        }

        admission
    }

    /// Apply the outcome of one completed call and return the updated record.
    /// `probe` is the ticket the call was admitted with.
    ///
    /// The outcome is applied to a copy first; if the copy breaks an
    /// invariant the live record is left untouched and a fault is returned.
    pub fn record_outcome(
        &self,
        key: &BreakerKey,
        outcome: &CallOutcome,
        probe: Option<ProbeTicket>,
    ) -> Result<CircuitBreakerRecord, BreakerFault> {
        let slot = self.slot(key);
        let now = self.clock.now();

        let (snapshot, transition) = {
            let mut record = lock(&slot);
            let mut next = record.clone();
            let transition = next.record_outcome(outcome, probe, now);
            if let Err(detail) = next.check_invariants() {
                error!(breaker = %key, %detail, "Circuit breaker invariant violated");
                return Err(BreakerFault::InvariantViolation {
                    key: key.to_string(),
                    detail,
                });
            }
            *record = next;
            (record.clone(), transition)
        };

        if let Some(transition) = transition {
            log_transition(key, transition, "call outcome");
        }

        Ok(snapshot)
    }

    /// Release the half-open slot of a trial call that was abandoned before
    /// completion. Counters and state are untouched, and a ticket that no
    /// longer holds the slot changes nothing.
    pub fn abandon(&self, key: &BreakerKey, probe: ProbeTicket) {
        let Some(slot) = self.existing_slot(key) else {
            return;
        };
        if lock(&slot).release_probe(probe) {
            warn!(breaker = %key, "Half-open probe abandoned without an outcome");
        }
    }

    /// Administrative override. Always succeeds.
    pub fn manual_control(
        &self,
        key: &BreakerKey,
        action: ManualAction,
        reason: Option<String>,
    ) -> CircuitBreakerRecord {
        let slot = self.slot(key);
        let (snapshot, transition) = {
            let mut record = lock(&slot);
            let transition = record.apply_manual(action, reason.clone());
            (record.clone(), transition)
        };

        info!(
            breaker = %key,
            action = ?action,
            reason = reason.as_deref().unwrap_or(""),
            state = %snapshot.state,
            "Circuit breaker manual control applied"
        );
        if let Some(transition) = transition {
            log_transition(key, transition, "manual control");
        }

        snapshot
    }

    /// Replace the thresholds of a live record
    pub fn reconfigure(
        &self,
        key: &BreakerKey,
        thresholds: BreakerThresholds,
    ) -> Result<CircuitBreakerRecord, BreakerFault> {
        let slot = self.slot(key);
        let mut record = lock(&slot);
        let mut next = record.clone();
        next.reconfigure(thresholds);
        next.check_invariants()
            .map_err(|detail| BreakerFault::InvariantViolation {
                key: key.to_string(),
                detail,
            })?;
        *record = next;
        info!(breaker = %key, ?thresholds, "Circuit breaker reconfigured");
        Ok(record.clone())
    }

    /// Load persisted records. A record already present in memory is kept
    /// when its revision is at least as new as the incoming one.
    pub fn hydrate(&self, records: impl IntoIterator<Item = CircuitBreakerRecord>) {
        let mut slots = lock(&self.slots);
        for mut incoming in records {
            incoming.probe_in_flight = None;
            match slots.get(&incoming.key) {
                Some(slot) => {
                    let mut current = lock(slot);
                    if incoming.revision > current.revision {
                        incoming.continue_tickets_from(&current);
                        *current = incoming;
                    }
                }
                None => {
                    slots.insert(incoming.key.clone(), Arc::new(Mutex::new(incoming)));
                }
            }
        }
    }

    /// Replace the live record with a stored copy that won a write race.
    /// The revision never goes backwards and a half-open slot still held
    /// by this process stays held.
    pub fn reload(&self, mut stored: CircuitBreakerRecord) {
        let slot = self.slot(&stored.key);
        let mut current = lock(&slot);
        stored.revision = stored.revision.max(current.revision);
        stored.probe_in_flight = current
            .probe_in_flight
            .filter(|_| stored.state == BreakerState::HalfOpen);
        stored.continue_tickets_from(&current);
        debug!(breaker = %stored.key, revision = stored.revision, "Circuit breaker reloaded from storage");
        *current = stored;
    }

    /// Apply an administrative change found in a stored row when it is newer
    /// than the last one this process has seen. The live record keeps its
    /// own counters; its revision moves past the stored one so the next
    /// write is accepted. Returns the updated record when a change applied.
    ///
    /// A key with no live record is loaded from the stored row as a whole.
    pub fn adopt_manual(&self, stored: &CircuitBreakerRecord) -> Option<CircuitBreakerRecord> {
        let Some(slot) = self.existing_slot(&stored.key) else {
            self.hydrate([stored.clone()]);
            return None;
        };
        let change = stored.last_manual.clone()?;

        let (snapshot, transition) = {
            let mut record = lock(&slot);
            if change.revision <= record.manual_revision() {
                return None;
            }
            record.revision = record.revision.max(stored.revision);
            let transition = record.replay_manual(change.clone());
            (record.clone(), transition)
        };

        info!(
            breaker = %stored.key,
            action = ?change.action,
            reason = change.reason.as_deref().unwrap_or(""),
            state = %snapshot.state,
            "Stored manual control adopted"
        );
        if let Some(transition) = transition {
            log_transition(&stored.key, transition, "manual control");
        }
        Some(snapshot)
    }

    /// Copy of the record for `key`, if one has been created
    pub fn snapshot(&self, key: &BreakerKey) -> Option<CircuitBreakerRecord> {
        self.existing_slot(key).map(|slot| lock(&slot).clone())
    }

    /// Copies of every record, ordered by key
    pub fn list(&self) -> Vec<CircuitBreakerRecord> {
        let slots: Vec<Slot> = lock(&self.slots).values().cloned().collect();
        let mut records: Vec<CircuitBreakerRecord> =
            slots.iter().map(|slot| lock(slot).clone()).collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn existing_slot(&self, key: &BreakerKey) -> Option<Slot> {
        lock(&self.slots).get(key).cloned()
    }

    fn slot(&self, key: &BreakerKey) -> Slot {
        let mut slots = lock(&self.slots);
        slots
            .entry(key.clone())
            .or_insert_with(|| {
                let thresholds = self.config.thresholds_for(&key.provider);
                Arc::new(Mutex::new(CircuitBreakerRecord::new(key.clone(), thresholds)))
            })
            .clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn log_transition(key: &BreakerKey, transition: Transition, cause: &'static str) {
    counter!(
        "circuit_breaker_transitions_total",
        "provider" => key.provider.clone(),
        "to" => transition.to.as_str()
    )
    .increment(1);
    info!(
        breaker = %key,
        from = %transition.from,
        to = %transition.to,
        cause,
        "Circuit breaker state changed"
    );
}
