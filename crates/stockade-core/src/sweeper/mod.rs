//! Expiry sweeper: releases holds whose timer elapsed
//!
//! A control loop, not a timer queue: every tick scans the store for PENDING
//! reservations past their deadline and processes each in its own
//! transaction. The conditional `UPDATE ... WHERE status = 'PENDING' AND
//! expires_at <= $now` is the compare-and-swap that makes concurrent sweepers
//! on other instances safe; at most one worker transitions a given
//! reservation and the loser just skips.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{reservation_event, routing_keys, EventPublisher};
use crate::config::ReservationConfig;
use crate::db::Database;
use crate::ledger::StockLedger;
use crate::models::Reservation;
use crate::store::ReservationStore;
use crate::Result;

pub struct ExpirySweeper {
    db: Database,
    ledger: StockLedger,
    store: ReservationStore,
    publisher: Arc<dyn EventPublisher>,
    config: ReservationConfig,
    stats: Arc<Mutex<SweeperStats>>,
    /// Held for the duration of a pass; a tick that finds it taken skips
    tick_guard: Arc<Mutex<()>>,
}

impl ExpirySweeper {
    pub fn new(
        db: Database,
        ledger: StockLedger,
        store: ReservationStore,
        publisher: Arc<dyn EventPublisher>,
        config: ReservationConfig,
    ) -> Self {
        let history = config.sweeper_error_history;
        Self {
            db,
            ledger,
            store,
            publisher,
            config,
            stats: Arc::new(Mutex::new(SweeperStats::new(history))),
            tick_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Start the periodic loop
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.sweeper_interval();
        info!(interval_secs = interval.as_secs(), "Starting expiry sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so startup isn't a sweep
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match self.tick_guard.clone().try_lock_owned() {
                    Ok(_guard) => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "Sweeper pass failed");
                        }
                    }
                    Err(_) => {
                        warn!("Previous sweeper pass still running, skipping tick");
                    }
                }
            }
        })
    }

    /// One full expiry pass; also the manual-trigger entry point
    pub async fn run_once(&self) -> Result<SweepOutcome> {
        let started = Instant::now();
        let now = Utc::now();

        let candidates = self
            .store
            .find_expired(self.config.sweeper_batch_limit)
            .await?;

        if candidates.is_empty() {
            let outcome = SweepOutcome {
                processed: 0,
                skipped: 0,
                duration: started.elapsed(),
            };
            self.stats.lock().await.record_run(&outcome, &[]);
            return Ok(outcome);
        }

        debug!(candidates = candidates.len(), "Processing expired reservations");

        let mut processed = 0usize;
        let mut skipped = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for candidate in candidates {
            match self.expire_one(&candidate, now).await {
                Ok(true) => processed += 1,
                Ok(false) => skipped += 1,
                Err(e) => {
                    // Record and continue; one bad row must not stall the pass
                    errors.push(format!("reservation {}: {}", candidate.id, e));
                }
            }
        }

        let outcome = SweepOutcome {
            processed,
            skipped,
            duration: started.elapsed(),
        };

        if !errors.is_empty() {
            warn!(
                errors = errors.len(),
                processed, "Sweeper pass finished with errors"
            );
        } else if processed > 0 {
            info!(processed, skipped, "Sweeper pass finished");
        }

        self.stats.lock().await.record_run(&outcome, &errors);

        Ok(outcome)
    }

    /// Expire a single reservation in an isolated transaction
    ///
    /// Returns Ok(false) when another worker (or a concurrent checkout) won
    /// the race and the row is no longer an expired PENDING hold.
    async fn expire_one(&self, candidate: &Reservation, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        // Item row first, then reservation row: same lock order as checkout,
        // so the two flows cannot deadlock.
        let item = self
            .ledger
            .release(&mut tx, candidate.item_id, candidate.quantity)
            .await?;

        let reservation = match self.store.mark_expired(&mut tx, candidate.id, now).await? {
            Some(reservation) => reservation,
            None => {
                // Lost the race; undo the release
                tx.rollback().await?;
                debug!(reservation_id = %candidate.id, "No longer expirable, skipping");
                return Ok(false);
            }
        };

        tx.commit().await?;

        info!(
            reservation_id = %reservation.id,
            item_id = %item.id,
            quantity = reservation.quantity,
            "Reservation expired"
        );

        let message =
            reservation_event(routing_keys::RESERVATION_EXPIRED, &reservation, &item, None)?;
        if let Err(e) = self
            .publisher
            .publish(routing_keys::RESERVATION_EXPIRED, &message)
            .await
        {
            warn!(reservation_id = %reservation.id, error = %e, "Expired event publish failed");
        }

        Ok(true)
    }

    /// Snapshot of run statistics
    pub async fn stats(&self) -> SweeperStatsSnapshot {
        self.stats.lock().await.snapshot()
    }

    /// Health derived from the run success rate
    pub async fn health(&self) -> SweeperHealth {
        let snapshot = self.stats.lock().await.snapshot();
        let success_rate = snapshot.success_rate();

        let status = if snapshot.total_runs == 0 || success_rate >= self.config.healthy_threshold {
            HealthStatus::Healthy
        } else if success_rate >= self.config.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        SweeperHealth {
            status,
            success_rate,
            stats: snapshot,
        }
    }
}

/// Result of one pass
#[derive(Debug, Clone, serde::Serialize)]
pub struct SweepOutcome {
    pub processed: usize,
    pub skipped: usize,
    #[serde(serialize_with = "serialize_duration_ms", rename = "durationMs")]
    pub duration: Duration,
}

fn serialize_duration_ms<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_millis())
}

/// Accumulated run statistics with a bounded error history
#[derive(Debug)]
pub struct SweeperStats {
    total_runs: u64,
    successful_runs: u64,
    failed_runs: u64,
    total_processed: u64,
    last_run_at: Option<DateTime<Utc>>,
    last_duration_ms: u64,
    last_errors: VecDeque<String>,
    error_history: usize,
}

impl SweeperStats {
    fn new(error_history: usize) -> Self {
        Self {
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            total_processed: 0,
            last_run_at: None,
            last_duration_ms: 0,
            last_errors: VecDeque::new(),
            error_history,
        }
    }

    fn record_run(&mut self, outcome: &SweepOutcome, errors: &[String]) {
        self.total_runs += 1;
        if errors.is_empty() {
            self.successful_runs += 1;
        } else {
            self.failed_runs += 1;
        }
        self.total_processed += outcome.processed as u64;
        self.last_run_at = Some(Utc::now());
        self.last_duration_ms = outcome.duration.as_millis() as u64;

        for error in errors {
            if self.last_errors.len() >= self.error_history {
                self.last_errors.pop_front();
            }
            self.last_errors.push_back(error.clone());
        }
    }

    fn snapshot(&self) -> SweeperStatsSnapshot {
        SweeperStatsSnapshot {
            total_runs: self.total_runs,
            successful_runs: self.successful_runs,
            failed_runs: self.failed_runs,
            total_processed: self.total_processed,
            last_run_at: self.last_run_at,
            last_duration_ms: self.last_duration_ms,
            last_errors: self.last_errors.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweeperStatsSnapshot {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub total_processed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_duration_ms: u64,
    pub last_errors: Vec<String>,
}

impl SweeperStatsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            1.0
        } else {
            self.successful_runs as f64 / self.total_runs as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweeperHealth {
    pub status: HealthStatus,
    pub success_rate: f64,
    pub stats: SweeperStatsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(processed: usize) -> SweepOutcome {
        SweepOutcome {
            processed,
            skipped: 0,
            duration: Duration::from_millis(12),
        }
    }

    #[test]
    fn test_stats_accumulate() {
        let mut stats = SweeperStats::new(100);
        stats.record_run(&outcome(3), &[]);
        stats.record_run(&outcome(0), &["reservation x: boom".to_string()]);

        let snap = stats.snapshot();
        assert_eq!(snap.total_runs, 2);
        assert_eq!(snap.successful_runs, 1);
        assert_eq!(snap.failed_runs, 1);
        assert_eq!(snap.total_processed, 3);
        assert_eq!(snap.last_errors.len(), 1);
        assert!((snap.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_ring_buffer_caps() {
        let mut stats = SweeperStats::new(3);
        for i in 0..10 {
            stats.record_run(&outcome(0), &[format!("error {}", i)]);
        }

        let snap = stats.snapshot();
        assert_eq!(snap.last_errors.len(), 3);
        // Oldest entries evicted first
        assert_eq!(snap.last_errors, vec!["error 7", "error 8", "error 9"]);
    }

    #[test]
    fn test_success_rate_with_no_runs() {
        let stats = SweeperStats::new(100);
        assert_eq!(stats.snapshot().success_rate(), 1.0);
    }

    #[test]
    fn test_health_thresholds() {
        // Pure threshold arithmetic, mirrored from ExpirySweeper::health
        let classify = |rate: f64| -> HealthStatus {
            if rate >= 0.95 {
                HealthStatus::Healthy
            } else if rate >= 0.80 {
                HealthStatus::Degraded
            } else {
                HealthStatus::Unhealthy
            }
        };

        assert_eq!(classify(1.0), HealthStatus::Healthy);
        assert_eq!(classify(0.95), HealthStatus::Healthy);
        assert_eq!(classify(0.90), HealthStatus::Degraded);
        assert_eq!(classify(0.80), HealthStatus::Degraded);
        assert_eq!(classify(0.50), HealthStatus::Unhealthy);
    }
}
