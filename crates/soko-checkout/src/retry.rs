//! # Reconciliation Worker
//!
//! Background task that finishes settlements the checkout could not
//! complete in one go.
//!
//! ## Worker Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   sleep(interval) ──► run_cycle ──► clean?  ── yes ──► backoff.reset   │
//! │        ▲                               │                                │
//! │        │                               no                               │
//! │        │                               ▼                                │
//! │        └──────────── sleep(backoff.next_backoff(), capped) ◄───────────┘
//! │                                                                         │
//! │   run_cycle:                                                            │
//! │     journal.list_incomplete(batch_size)                                 │
//! │       attempts ≥ max_attempts ──► flag_for_review, notify, skip        │
//! │       otherwise               ──► reconciler.resume(entry)             │
//! │                                                                         │
//! │   RunNow command runs one cycle immediately and replies with a report. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ReconciliationSettings;
use crate::error::{CheckoutError, CheckoutResult};
use crate::notify::{Notification, Notifier};
use crate::reconciler::SettlementReconciler;

/// Counts from one pass over the journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub flagged: usize,
}

impl CycleReport {
    /// No entry failed this cycle.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

enum WorkerCommand {
    RunNow(oneshot::Sender<CheckoutResult<CycleReport>>),
}

// =============================================================================
// Worker Handle
// =============================================================================

/// Handle for controlling the reconciliation worker.
#[derive(Clone)]
pub struct ReconciliationWorkerHandle {
    command_tx: mpsc::Sender<WorkerCommand>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ReconciliationWorkerHandle {
    /// Runs one cycle now and waits for its report.
    pub async fn run_now(&self) -> CheckoutResult<CycleReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(WorkerCommand::RunNow(reply_tx))
            .await
            .map_err(|_| CheckoutError::WorkerStopped)?;
        reply_rx.await.map_err(|_| CheckoutError::WorkerStopped)?
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> CheckoutResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| CheckoutError::WorkerStopped)
    }
}

// =============================================================================
// Reconciliation Worker
// =============================================================================

/// Retries incomplete settlements from the journal.
pub struct ReconciliationWorker {
    reconciler: SettlementReconciler,
    settings: ReconciliationSettings,
    notifier: Arc<dyn Notifier>,
    command_rx: mpsc::Receiver<WorkerCommand>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl ReconciliationWorker {
    /// Spawns the worker task.
    pub fn spawn(
        reconciler: SettlementReconciler,
        settings: ReconciliationSettings,
        notifier: Arc<dyn Notifier>,
    ) -> (ReconciliationWorkerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker = ReconciliationWorker {
            reconciler,
            settings,
            notifier,
            command_rx,
            shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        (
            ReconciliationWorkerHandle {
                command_tx,
                shutdown_tx,
            },
            task,
        )
    }

    async fn run(mut self) {
        info!(
            interval_secs = self.settings.interval_secs,
            max_attempts = self.settings.max_attempts,
            "Reconciliation worker starting"
        );

        let interval = Duration::from_secs(self.settings.interval_secs);
        let mut backoff = self.create_backoff();
        let mut wait = interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let clean = match self.run_cycle().await {
                        Ok(report) => report.is_clean(),
                        Err(e) => {
                            error!(error = %e, "Reconciliation cycle failed");
                            false
                        }
                    };

                    wait = if clean {
                        backoff.reset();
                        interval
                    } else {
                        let delay = backoff
                            .next_backoff()
                            .unwrap_or(Duration::from_secs(self.settings.max_backoff_secs));
                        debug!(?delay, "Backing off before next reconciliation cycle");
                        delay
                    };
                }

                command = self.command_rx.recv() => match command {
                    Some(WorkerCommand::RunNow(reply)) => {
                        let _ = reply.send(self.run_cycle().await);
                    }
                    None => break,
                },

                _ = self.shutdown_rx.recv() => {
                    info!("Reconciliation worker shutting down");
                    break;
                }
            }
        }

        info!("Reconciliation worker stopped");
    }

    /// One pass over the incomplete journal entries.
    pub async fn run_cycle(&self) -> CheckoutResult<CycleReport> {
        let entries = self
            .reconciler
            .journal()
            .list_incomplete(self.settings.batch_size)
            .await?;

        let mut report = CycleReport {
            examined: entries.len(),
            ..CycleReport::default()
        };

        for entry in entries {
            if entry.attempts >= self.settings.max_attempts {
                self.flag(&entry.attempt_id, entry.attempts).await;
                report.flagged += 1;
                continue;
            }

            let attempt_id = entry.attempt_id.clone();
            let run = self.reconciler.resume(entry).await;

            if run.is_complete() {
                info!(attempt_id = %attempt_id, sale_id = %run.entry.sale.id, "Settlement completed on retry");
                report.completed += 1;
            } else {
                report.failed += 1;
                if run.attempts >= self.settings.max_attempts {
                    self.flag(&attempt_id, run.attempts).await;
                    report.flagged += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                completed = report.completed,
                failed = report.failed,
                flagged = report.flagged,
                "Reconciliation cycle finished"
            );
        }
        Ok(report)
    }

    async fn flag(&self, attempt_id: &str, attempts: u32) {
        warn!(attempt_id = %attempt_id, attempts, "Settlement retry budget exhausted");

        if let Err(e) = self.reconciler.journal().flag_for_review(attempt_id).await {
            error!(attempt_id = %attempt_id, error = %e, "Failed to flag settlement for review");
        }
        self.notifier
            .notify(Notification::settlement_flagged(attempt_id, attempts));
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.settings.initial_backoff_ms),
            max_interval: Duration::from_secs(self.settings.max_backoff_secs),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStores;
    use crate::notify::RecordingNotifier;
    use soko_core::{
        BusinessProfile, Cart, Money, PaymentAttempt, PricingPolicy, Product, SettledPayment,
        TaxRate,
    };

    fn product() -> Product {
        Product {
            id: "p-rice".into(),
            sku: "RICE-2KG".into(),
            barcode: None,
            name: "Rice 2kg".into(),
            price_cents: 32_000,
            quantity_available: 20,
        }
    }

    fn profile() -> BusinessProfile {
        BusinessProfile {
            name: "Duka".into(),
            address: None,
            phone: None,
            tax_pin: None,
            currency: "KES".into(),
            tax_rate: TaxRate::from_bps(1600),
            footer: None,
        }
    }

    fn settings(max_attempts: u32) -> ReconciliationSettings {
        ReconciliationSettings {
            interval_secs: 30,
            batch_size: 10,
            max_attempts,
            initial_backoff_ms: 500,
            max_backoff_secs: 60,
        }
    }

    /// Settles one cash sale with stock writes failing `stock_failures` times.
    async fn incomplete_sale(
        stores: &MemoryStores,
        reconciler: &SettlementReconciler,
        stock_failures: u32,
    ) -> String {
        stores.add_product(product()).await;
        stores.fail_next_stock(stock_failures).await;

        let mut cart = Cart::new();
        cart.add_line(&product()).unwrap();
        let draft = cart
            .to_draft(0, &PricingPolicy::default(), None, None)
            .unwrap();

        let mut attempt = PaymentAttempt::cash(draft.amount_due());
        attempt.settle_cash(Money::from_major(320)).unwrap();
        let payment = SettledPayment::from_attempt(&attempt).unwrap();

        let outcome = reconciler.settle(&draft, &payment).await;
        assert!(!outcome.is_complete());
        payment.attempt_id
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_completes_pending_stock() {
        let stores = MemoryStores::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let reconciler = SettlementReconciler::new(&stores.stores(), notifier.clone(), profile());
        let attempt_id = incomplete_sale(&stores, &reconciler, 1).await;

        let (handle, task) = ReconciliationWorker::spawn(reconciler, settings(5), notifier);
        let report = handle.run_now().await.unwrap();

        assert_eq!(
            report,
            CycleReport {
                examined: 1,
                completed: 1,
                failed: 0,
                flagged: 0
            }
        );
        assert_eq!(stores.stock_of("p-rice").await, Some(19));
        assert!(stores.journal_entry(&attempt_id).await.unwrap().is_complete());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(handle.run_now().await, Err(CheckoutError::WorkerStopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_flags_for_review() {
        let stores = MemoryStores::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let reconciler = SettlementReconciler::new(&stores.stores(), notifier.clone(), profile());
        // One failure at checkout, one on the first retry
        let attempt_id = incomplete_sale(&stores, &reconciler, 2).await;

        let (handle, _task) = ReconciliationWorker::spawn(reconciler, settings(2), notifier.clone());

        let report = handle.run_now().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.flagged, 1);

        let entry = stores.journal_entry(&attempt_id).await.unwrap();
        assert!(entry.needs_review);
        assert_eq!(entry.attempts, 2);
        assert!(notifier
            .titles()
            .contains(&"Manual reconciliation needed".to_string()));

        // Flagged entries are no longer retried
        let report = handle.run_now().await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(stores.stock_of("p-rice").await, Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_finishes_sale_settled_during_journal_outage() {
        let stores = MemoryStores::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let reconciler = SettlementReconciler::new(&stores.stores(), notifier.clone(), profile());
        stores.fail_next_journal(1).await;
        let attempt_id = incomplete_sale(&stores, &reconciler, 1).await;

        let (handle, _task) = ReconciliationWorker::spawn(reconciler, settings(5), notifier);
        let report = handle.run_now().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(stores.stock_of("p-rice").await, Some(19));
        assert!(stores.journal_entry(&attempt_id).await.unwrap().is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_cycle_runs_on_interval() {
        let stores = MemoryStores::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let reconciler = SettlementReconciler::new(&stores.stores(), notifier.clone(), profile());
        incomplete_sale(&stores, &reconciler, 1).await;

        let (handle, _task) = ReconciliationWorker::spawn(reconciler, settings(5), notifier);
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(stores.stock_of("p-rice").await, Some(19));
        handle.shutdown().await.unwrap();
    }
}
