//! Concurrent unit scheduler.
//!
//! Every registered unit gets its own tokio task. A unit waits on its
//! dependencies' state channels (no polling), runs its action in an inner
//! task so panics and timeouts stay contained, then publishes its fields,
//! settles its category and flips to `Done` under the state channel's lock.
//! Dependents and `wait()` observe `Done` only after all of that is visible.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{FailureCause, UnitState, UnitSummary};

use super::context::{UnitContext, UnitError};
use super::registry::{Registry, UnitDef};
use super::store::{Fields, ResultStore};

/// Scheduling limits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Default per-unit timeout (units may override)
    pub unit_timeout: Option<Duration>,

    /// Deadline for overall completion, measured from start
    pub run_deadline: Option<Duration>,

    /// Maximum number of actions running at once
    pub max_concurrency: Option<usize>,
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runtime state of one unit
struct UnitCell {
    state: watch::Sender<UnitState>,
    cause: OnceLock<FailureCause>,
    started_at: OnceLock<Instant>,
    finished_at: OnceLock<Instant>,
}

impl UnitCell {
    fn new() -> Self {
        let (state, _) = watch::channel(UnitState::Queued);
        Self {
            state,
            cause: OnceLock::new(),
            started_at: OnceLock::new(),
            finished_at: OnceLock::new(),
        }
    }

    fn current(&self) -> UnitState {
        *self.state.borrow()
    }

    fn mark_running(&self) -> bool {
        let _ = self.started_at.set(Instant::now());
        self.state.send_if_modified(|state| {
            if *state != UnitState::Queued {
                return false;
            }
            *state = UnitState::Running;
            true
        })
    }

    /// Publish, settle the category and transition to `Done` under the
    /// state channel's lock. Anyone who observes `Done` also sees the
    /// fields and the settled category flag.
    fn complete(&self, def: &UnitDef, store: &ResultStore, fields: Fields) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            store.publish(def.name(), fields);
            if let Some(category) = def.category() {
                store.settle_category(category, true);
            }
            let _ = self.finished_at.set(Instant::now());
            *state = UnitState::Done;
            true
        })
    }

    fn fail(&self, def: &UnitDef, store: &ResultStore, cause: FailureCause) -> bool {
        let failed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            let _ = self.cause.set(cause.clone());
            if let Some(category) = def.category() {
                store.settle_category(category, false);
            }
            let _ = self.finished_at.set(Instant::now());
            *state = UnitState::Failed;
            true
        });
        if failed {
            warn!(unit = def.name(), %cause, "Unit failed");
        }
        failed
    }

    fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at.get()?;
        let finished = self.finished_at.get()?;
        Some(finished.saturating_duration_since(*started).as_millis() as u64)
    }
}

/// Starts registered units
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Spawn one task per unit and return a handle to the run.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(self, registry), fields(units = registry.len()))]
    pub fn start(&self, registry: &Registry) -> ScheduledRun {
        let run_id = Uuid::new_v4();
        let store = Arc::new(ResultStore::for_registry(registry));
        let cells: Vec<Arc<UnitCell>> = registry.units().iter().map(|_| Arc::new(UnitCell::new())).collect();
        let semaphore = self
            .settings
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        info!(%run_id, "Starting collection run");

        let mut drivers = Vec::with_capacity(cells.len());
        for (idx, def) in registry.units().iter().enumerate() {
            let dependencies = def
                .dependencies()
                .iter()
                .filter_map(|name| {
                    registry
                        .index_of(name)
                        .map(|dep| (name.clone(), cells[dep].state.subscribe()))
                })
                .collect();

            let driver = UnitDriver {
                registry: registry.clone(),
                idx,
                cell: cells[idx].clone(),
                store: store.clone(),
                dependencies,
                semaphore: semaphore.clone(),
                timeout: def.timeout().or(self.settings.unit_timeout),
            };
            drivers.push(AbortOnDrop(tokio::spawn(driver.run())));
        }

        ScheduledRun {
            run_id,
            registry: registry.clone(),
            store,
            cells,
            drivers,
            deadline: self.settings.run_deadline,
            started_at: Instant::now(),
        }
    }
}

/// Everything one unit task needs
struct UnitDriver {
    registry: Registry,
    idx: usize,
    cell: Arc<UnitCell>,
    store: Arc<ResultStore>,
    dependencies: Vec<(String, watch::Receiver<UnitState>)>,
    semaphore: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
}

impl UnitDriver {
    async fn run(self) {
        let def = &self.registry.units()[self.idx];

        for (name, mut rx) in self.dependencies {
            let state = match rx.wait_for(|s| s.is_terminal()).await {
                Ok(state) => *state,
                Err(_) => UnitState::Failed,
            };
            if state == UnitState::Failed {
                self.cell.fail(
                    def,
                    &self.store,
                    FailureCause::DependencyFailed { dependency: name },
                );
                return;
            }
        }

        let _permit = match &self.semaphore {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.cell.fail(
                        def,
                        &self.store,
                        FailureCause::Error {
                            message: "concurrency limiter closed".to_string(),
                        },
                    );
                    return;
                }
            },
            None => None,
        };

        if !self.cell.mark_running() {
            return;
        }
        debug!(unit = def.name(), "Unit running");

        let ctx = UnitContext::new(
            def.shared_name(),
            def.category(),
            self.store.clone(),
            def.readable(),
        );
        let action = def.action();
        let mut task = AbortOnDrop(tokio::spawn(async move { action.run(ctx).await }));

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task.0).await {
                Ok(joined) => joined,
                Err(_) => {
                    self.cell.fail(
                        def,
                        &self.store,
                        FailureCause::TimedOut {
                            after_ms: limit.as_millis() as u64,
                        },
                    );
                    return;
                }
            },
            None => (&mut task.0).await,
        };

        match joined {
            Ok(Ok(fields)) => match self.store.check_publication(def.name(), &fields) {
                Ok(()) => {
                    if self.cell.complete(def, &self.store, fields) {
                        debug!(
                            unit = def.name(),
                            duration_ms = self.cell.duration_ms().unwrap_or(0),
                            "Unit done"
                        );
                    }
                }
                Err(e) => {
                    self.cell.fail(def, &self.store, cause_from(e));
                }
            },
            Ok(Err(e)) => {
                self.cell.fail(def, &self.store, cause_from(e));
            }
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                error!(unit = def.name(), %message, "Unit panicked");
                self.cell
                    .fail(def, &self.store, FailureCause::Panicked { message });
            }
            Err(_) => {
                self.cell.fail(
                    def,
                    &self.store,
                    FailureCause::Error {
                        message: "unit task was cancelled".to_string(),
                    },
                );
            }
        }
    }
}

fn cause_from(error: UnitError) -> FailureCause {
    match error {
        UnitError::TimedOut(after) => FailureCause::TimedOut {
            after_ms: after.as_millis() as u64,
        },
        other => FailureCause::Error {
            message: other.to_string(),
        },
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// How overall completion was reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Blocking units that ended `Done`
    pub done: Vec<String>,

    /// Blocking units that ended `Failed`, including forced ones
    pub failed: Vec<String>,

    /// Blocking units force-failed by the run deadline
    pub forced: Vec<String>,

    pub elapsed: Duration,
}

/// Handle to a started run. Dropping it aborts every unit still running.
pub struct ScheduledRun {
    run_id: Uuid,
    registry: Registry,
    store: Arc<ResultStore>,
    cells: Vec<Arc<UnitCell>>,
    drivers: Vec<AbortOnDrop<()>>,
    deadline: Option<Duration>,
    started_at: Instant,
}

impl ScheduledRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn state(&self, name: &str) -> Option<UnitState> {
        self.registry
            .index_of(name)
            .map(|idx| self.cells[idx].current())
    }

    pub fn cause(&self, name: &str) -> Option<FailureCause> {
        self.registry
            .index_of(name)
            .and_then(|idx| self.cells[idx].cause.get().cloned())
    }

    /// Watch a unit's state transitions
    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<UnitState>> {
        self.registry
            .index_of(name)
            .map(|idx| self.cells[idx].state.subscribe())
    }

    /// Current state of every unit, in registration order
    pub fn states(&self) -> Vec<(String, UnitState)> {
        self.registry
            .units()
            .iter()
            .zip(&self.cells)
            .map(|(def, cell)| (def.name().to_string(), cell.current()))
            .collect()
    }

    /// Overall completion: every blocking unit is `Done` or `Failed`
    pub fn is_complete(&self) -> bool {
        self.registry
            .units()
            .iter()
            .zip(&self.cells)
            .filter(|(def, _)| !def.is_non_blocking())
            .all(|(_, cell)| cell.current().is_terminal())
    }

    /// Wait for overall completion, enforcing the run deadline if set
    pub async fn wait(&self) -> Completion {
        let blocking: Vec<usize> = self
            .registry
            .units()
            .iter()
            .enumerate()
            .filter(|(_, def)| !def.is_non_blocking())
            .map(|(idx, _)| idx)
            .collect();

        let all_terminal = async {
            for &idx in &blocking {
                let mut rx = self.cells[idx].state.subscribe();
                let _ = rx.wait_for(|s| s.is_terminal()).await;
            }
        };

        let mut forced = Vec::new();
        match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_sub(self.started_at.elapsed());
                if tokio::time::timeout(remaining, all_terminal).await.is_err() {
                    warn!(?deadline, "Run deadline reached, failing unfinished units");
                    for &idx in &blocking {
                        let def = &self.registry.units()[idx];
                        if self.cells[idx].fail(def, &self.store, FailureCause::DeadlineExceeded) {
                            self.drivers[idx].0.abort();
                            forced.push(def.name().to_string());
                        }
                    }
                }
            }
            None => all_terminal.await,
        }

        let mut done = Vec::new();
        let mut failed = Vec::new();
        for &idx in &blocking {
            let name = self.registry.units()[idx].name().to_string();
            match self.cells[idx].current() {
                UnitState::Done => done.push(name),
                _ => failed.push(name),
            }
        }

        let completion = Completion {
            done,
            failed,
            forced,
            elapsed: self.started_at.elapsed(),
        };
        info!(
            run_id = %self.run_id,
            done = completion.done.len(),
            failed = completion.failed.len(),
            elapsed_ms = completion.elapsed.as_millis() as u64,
            "Collection complete"
        );
        completion
    }

    /// Per-unit summaries for the report metadata
    pub fn summaries(&self) -> Vec<UnitSummary> {
        self.registry
            .units()
            .iter()
            .zip(&self.cells)
            .map(|(def, cell)| UnitSummary {
                name: def.name().to_string(),
                state: cell.current(),
                duration_ms: cell.duration_ms(),
                cause: cell.cause.get().cloned(),
            })
            .collect()
    }

    /// Names of units whose state is not yet terminal
    pub fn unfinished(&self) -> Vec<String> {
        self.states()
            .into_iter()
            .filter(|(_, state)| !state.is_terminal())
            .map(|(name, _)| name)
            .collect()
    }

    /// End the run, aborting anything still in flight
    pub fn shutdown(self) {
        let unfinished = self.unfinished();
        if !unfinished.is_empty() {
            debug!(?unfinished, "Aborting units still running at shutdown");
        }
        drop(self);
    }
}

impl std::fmt::Debug for ScheduledRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let states: HashMap<String, UnitState> = self.states().into_iter().collect();
        f.debug_struct("ScheduledRun")
            .field("run_id", &self.run_id)
            .field("states", &states)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{UnitRegistry, UnitSpec};
    use serde_json::json;

    #[tokio::test]
    async fn test_single_unit_publishes() {
        let mut registry = UnitRegistry::new();
        registry
            .register(
                UnitSpec::new("A", |_ctx: UnitContext| async {
                    Ok(Fields::new().with("a", json!(1)))
                })
                .owns(["a"]),
            )
            .unwrap();
        let registry = registry.build().unwrap();

        let run = Scheduler::default().start(&registry);
        let completion = run.wait().await;

        assert_eq!(completion.done, vec!["A".to_string()]);
        assert_eq!(run.state("A"), Some(UnitState::Done));
        assert_eq!(run.store().get("a"), Some(&json!(1)));
        assert!(run.is_complete());
    }

    #[tokio::test]
    async fn test_undeclared_publication_fails_unit() {
        let mut registry = UnitRegistry::new();
        registry
            .register(
                UnitSpec::new("A", |_ctx: UnitContext| async {
                    Ok(Fields::new().with("a", json!(1)).with("stray", json!(2)))
                })
                .owns(["a"]),
            )
            .unwrap();
        let registry = registry.build().unwrap();

        let run = Scheduler::default().start(&registry);
        run.wait().await;

        assert_eq!(run.state("A"), Some(UnitState::Failed));
        // All-or-nothing: the declared field is not published either
        assert_eq!(run.store().get("a"), None);
    }

    #[tokio::test]
    async fn test_summaries_cover_every_unit() {
        let mut registry = UnitRegistry::new();
        registry
            .register(UnitSpec::new("ok", |_ctx: UnitContext| async { Ok(Fields::new()) }))
            .unwrap();
        registry
            .register(UnitSpec::new("bad", |_ctx: UnitContext| async {
                Err(UnitError::fatal("no data"))
            }))
            .unwrap();
        let registry = registry.build().unwrap();

        let run = Scheduler::default().start(&registry);
        run.wait().await;

        let summaries = run.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].state, UnitState::Done);
        assert_eq!(
            summaries[1].cause,
            Some(FailureCause::Error {
                message: "no data".to_string()
            })
        );
    }
}
