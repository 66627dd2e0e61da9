//! Main orchestrator for one logical run.
//!
//! Drives collection, assembly, redaction and delivery, restarts from
//! assembly when a redaction rule or the upload fails, and reports exactly
//! one outcome to the shell.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::adapters::{signal, Progress, Shell};
use crate::domain::{FatalReport, Outcome, ReportMeta, UnitState};

use super::assembler::Assembler;
use super::delivery::Delivery;
use super::redaction::Redactor;
use super::registry::Registry;
use super::scheduler::{ScheduledRun, Scheduler};
use super::store::StoreSnapshot;

/// Main pipeline orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    scheduler: Scheduler,
    assembler: Assembler,
    redactor: Redactor,
    delivery: Delivery,
    progress: Option<Arc<dyn Progress>>,
}

/// Forwards one unit's transitions to the progress sink
struct Watcher {
    blocking: bool,
    handle: JoinHandle<()>,
}

/// Mutable state carried across restarts of the same logical run
struct Attempt {
    redactor: Redactor,
    local_only: bool,
    upload_failure: Option<String>,
}

impl Orchestrator {
    /// Create an orchestrator with default scheduling and no redaction
    pub fn new(delivery: Delivery) -> Self {
        Self {
            scheduler: Scheduler::default(),
            assembler: Assembler::default(),
            redactor: Redactor::default(),
            delivery,
            progress: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_assembler(mut self, assembler: Assembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    /// Report unit state transitions to `progress` while collecting
    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Execute one logical run and signal the shell once.
    ///
    /// Never fails: internal defects become [`Outcome::Fatal`] after an
    /// attempt to save a partial document.
    #[instrument(skip_all, fields(units = registry.len()))]
    pub async fn run(&self, registry: &Registry, shell: &dyn Shell) -> Outcome {
        let this = self.clone();
        let registry = registry.clone();

        // Run on its own task so a panic anywhere in the pipeline is contained
        let outcome = match tokio::spawn(async move { this.execute(&registry).await }).await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                let reason = format!("pipeline task aborted: {}", join_error);
                error!(%reason, "Pipeline panicked");
                self.persist_fatal(&[], &reason).await;
                Outcome::Fatal { reason }
            }
        };

        info!(%outcome, "Run finished");
        signal(shell, &outcome);
        outcome
    }

    async fn execute(&self, registry: &Registry) -> Outcome {
        let scheduled = self.scheduler.start(registry);
        let watchers = self.watch_progress(&scheduled);
        let completion = scheduled.wait().await;

        // Blocking units are terminal now, so their watchers end on their own
        for watcher in watchers {
            if watcher.blocking {
                if let Err(e) = watcher.handle.await {
                    warn!(error = %e, "Progress sink panicked");
                }
            } else {
                watcher.handle.abort();
            }
        }

        let mut snapshot = scheduled.store().snapshot();
        let meta = ReportMeta {
            run_id: scheduled.run_id(),
            elapsed_time: completion.elapsed.as_millis() as u64,
            generation_date: Utc::now(),
            units: scheduled.summaries(),
        };
        scheduled.shutdown();

        match self.deliver_with_restarts(&mut snapshot, &meta).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(%reason, "Pipeline failed");
                self.persist_fatal(snapshot.issues(), &reason).await;
                Outcome::Fatal { reason }
            }
        }
    }

    fn watch_progress(&self, scheduled: &ScheduledRun) -> Vec<Watcher> {
        let Some(progress) = &self.progress else {
            return Vec::new();
        };

        scheduled
            .registry()
            .units()
            .iter()
            .filter_map(|def| {
                let rx = scheduled.subscribe(def.name())?;
                let handle = tokio::spawn(forward_states(
                    def.name().to_string(),
                    rx,
                    Arc::clone(progress),
                ));
                Some(Watcher {
                    blocking: !def.is_non_blocking(),
                    handle,
                })
            })
            .collect()
    }

    /// Assemble, redact and deliver, restarting from assembly on a
    /// redaction or upload failure.
    ///
    /// Every restart permanently disables a rule or network delivery, so
    /// at most `rules + 1` restarts can happen.
    async fn deliver_with_restarts(
        &self,
        snapshot: &mut StoreSnapshot,
        meta: &ReportMeta,
    ) -> Result<Outcome> {
        let mut attempt = Attempt {
            redactor: self.redactor.clone(),
            local_only: self.delivery.is_local_only(),
            upload_failure: None,
        };
        let max_restarts = attempt.redactor.enabled().len() + 1;

        for pass in 0..=max_restarts {
            let report = self.assembler.assemble(snapshot, meta);
            let text = report
                .to_canonical_json()
                .context("Failed to serialize report")?;

            let text = match attempt.redactor.redact(&text, snapshot) {
                Ok(text) => text,
                Err(e) => {
                    warn!(rule = %e.rule(), pass, "Redaction failed, assembling again without it");
                    snapshot.push_issue(e.to_string());
                    attempt.redactor.disable(e.rule());
                    continue;
                }
            };

            if attempt.local_only {
                let path = self
                    .delivery
                    .save_local(&text)
                    .await
                    .context("Failed to save report locally")?;
                return Ok(match attempt.upload_failure {
                    Some(reason) => Outcome::UploadFailed { path, reason },
                    None => Outcome::SavedLocally { path },
                });
            }

            match self.delivery.upload(&text).await {
                Ok(url) => return Ok(Outcome::Uploaded { url }),
                Err(e) => {
                    warn!(error = %e, pass, "Upload failed, falling back to local save");
                    attempt.upload_failure = Some(e.to_string());
                    attempt.local_only = true;
                }
            }
        }

        anyhow::bail!("Gave up after {} restarts", max_restarts)
    }

    /// Best-effort save of a minimal document after an internal defect
    async fn persist_fatal(&self, issues: &[String], diagnostic: &str) {
        let report = FatalReport {
            version: self.assembler.version().to_string(),
            issues: issues.to_vec(),
            diagnostic: diagnostic.to_string(),
        };

        let text = match serde_json::to_string_pretty(&report) {
            Ok(text) => text + "\n",
            Err(e) => {
                error!(error = %e, "Could not serialize fatal report");
                return;
            }
        };

        if let Err(e) = self.delivery.save_local(&text).await {
            error!(error = %e, "Could not save fatal report");
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("scheduler", &self.scheduler)
            .field("assembler", &self.assembler)
            .field("redactor", &self.redactor)
            .field("delivery", &self.delivery)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Report each distinct state until the unit is terminal
async fn forward_states(
    unit: String,
    mut rx: watch::Receiver<UnitState>,
    progress: Arc<dyn Progress>,
) {
    let mut last = None;
    loop {
        let state = *rx.borrow_and_update();
        if last != Some(state) {
            progress.on_unit_state(&unit, state);
            last = Some(state);
        }
        if state.is_terminal() || rx.changed().await.is_err() {
            break;
        }
    }
}
