// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Ledger cross-check
//!
//! Compares each participant's local sent/received counts with the totals the
//! external token source reports. Fetches run on a bounded pool of workers
//! draining a shared queue; one participant's failure never aborts the batch.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Bounded fan-out reconciliation against external audit data

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::audit::{ExternalTokenSource, ExternalTokenTotals};
use crate::domain::contract::{Contract, ContractHash};
use crate::domain::participant::ParticipantId;
use crate::domain::token::TokenDirection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerMismatch {
    pub participant: ParticipantId,
    pub local: ExternalTokenTotals,
    pub external: ExternalTokenTotals,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrossCheckReport {
    pub contract: Option<ContractHash>,
    pub checked: usize,
    pub mismatches: Vec<LedgerMismatch>,
    pub failures: Vec<(ParticipantId, String)>,
}

impl CrossCheckReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct LedgerCrossCheck {
    source: Arc<dyn ExternalTokenSource>,
    max_workers: usize,
}

impl LedgerCrossCheck {
    pub fn new(source: Arc<dyn ExternalTokenSource>, max_workers: usize) -> Self {
        Self {
            source,
            max_workers: max_workers.max(1),
        }
    }

    pub async fn run(&self, contract: &Contract) -> CrossCheckReport {
        let work: VecDeque<(ParticipantId, ExternalTokenTotals)> = contract
            .participants_in_order()
            .map(|turn| {
                let local = ExternalTokenTotals {
                    sent: turn.ledger.count(TokenDirection::Sent),
                    received: turn.ledger.count(TokenDirection::Received),
                };
                (turn.participant_id.clone(), local)
            })
            .collect();

        let hash = contract.hash().clone();
        let workers = work.len().min(self.max_workers);
        let queue = Arc::new(Mutex::new(work));
        let report = Arc::new(Mutex::new(CrossCheckReport {
            contract: Some(hash.clone()),
            ..CrossCheckReport::default()
        }));

        debug!(contract = %hash, workers, "Starting ledger cross-check");

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let queue = queue.clone();
                let report = report.clone();
                let source = self.source.clone();
                let hash = hash.clone();
                tokio::spawn(async move {
                    loop {
                        let next = queue.lock().pop_front();
                        let Some((participant, local)) = next else {
                            break;
                        };
                        let fetched = source.token_totals(&hash, &participant).await;
                        let mut report = report.lock();
                        report.checked += 1;
                        match fetched {
                            Ok(external) if external != local => {
                                report.mismatches.push(LedgerMismatch {
                                    participant,
                                    local,
                                    external,
                                });
                            }
                            Ok(_) => {}
                            Err(e) => report.failures.push((participant, e.to_string())),
                        }
                    }
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(contract = %hash, "Cross-check worker stopped unexpectedly: {}", e);
            }
        }

        let mut report = std::mem::take(&mut *report.lock());
        report.mismatches.sort_by(|a, b| a.participant.cmp(&b.participant));
        report.failures.sort_by(|a, b| a.0.cmp(&b.0));
        if !report.is_clean() {
            warn!(
                contract = %hash,
                mismatches = report.mismatches.len(),
                failures = report.failures.len(),
                "Ledger cross-check found discrepancies"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::AuditError;
    use crate::domain::commands::{Actor, Command, CommandEnvelope};
    use crate::domain::contract::{ContractParams, LocationId};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Reports zero totals for everyone and fails for one participant.
    struct MockTokenSource {
        failing: ParticipantId,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ExternalTokenSource for MockTokenSource {
        async fn token_totals(
            &self,
            _contract: &ContractHash,
            participant: &ParticipantId,
        ) -> Result<ExternalTokenTotals, AuditError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if *participant == self.failing {
                return Err(AuditError::Unavailable("timeout".to_string()));
            }
            Ok(ExternalTokenTotals::default())
        }
    }

    fn contract_with(names: &[&str]) -> Contract {
        let params = ContractParams::new("c", "k", names.len(), Duration::from_secs(3600));
        let mut contract = Contract::new(LocationId::from("room"), params, Utc::now()).unwrap();
        for name in names {
            let envelope = CommandEnvelope::new(
                Actor::member(*name),
                Command::Join {
                    participant: (*name).into(),
                    display_name: None,
                    guest: false,
                },
            );
            contract.apply(&envelope, Utc::now()).unwrap();
        }
        contract
    }

    #[tokio::test]
    async fn test_failures_are_collected_and_workers_bounded() {
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let contract = contract_with(&names);
        let source = Arc::new(MockTokenSource {
            failing: "c".into(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let check = LedgerCrossCheck::new(source.clone(), 3);

        let report = check.run(&contract).await;
        assert_eq!(report.checked, names.len());
        assert!(report.mismatches.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, ParticipantId::from("c"));
        assert!(source.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_mismatch_reported_against_local_ledger() {
        let mut contract = contract_with(&["a", "b"]);
        contract
            .apply(&CommandEnvelope::new(Actor::member("a"), Command::Start), Utc::now())
            .unwrap();
        contract
            .apply(
                &CommandEnvelope::new(
                    Actor::member("b"),
                    Command::SendTokens {
                        sender: "b".into(),
                        quantity: 4,
                        recipient: None,
                    },
                ),
                Utc::now(),
            )
            .unwrap();

        let source = Arc::new(MockTokenSource {
            failing: "nobody".into(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let report = LedgerCrossCheck::new(source, 8).run(&contract).await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.mismatches.len(), 2);
        assert_eq!(report.mismatches[0].participant, ParticipantId::from("a"));
        assert_eq!(report.mismatches[0].local.received, 4);
        assert_eq!(report.mismatches[1].local.sent, 4);
    }
}
