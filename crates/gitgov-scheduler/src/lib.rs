// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-scheduler
//!
//! A background ticker over the sync engine's pull. Configuration
//! cascades session preferences over project defaults over built-ins,
//! and is loaded lazily so construction never touches the disk. The
//! scheduler is the only layer that classifies transient network errors;
//! everything else propagates failures untouched.

use async_trait::async_trait;
use gitgov_bus::{EventBus, GovEvent};
use gitgov_config::{ConfigManager, GitgovConfig, PullSchedulerDefaults, SessionManager};
use gitgov_sync::{PullOptions, PullResult, SyncEngine, SyncError};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Resolved scheduler configuration after the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Whether the scheduler runs at all.
    pub enabled: bool,
    /// Seconds between background pulls.
    pub pull_interval_seconds: u64,
    /// Keep ticking through transient network errors.
    pub continue_on_network_error: bool,
    /// Stop the scheduler when a conflict is detected.
    pub stop_on_conflict: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pull_interval_seconds: 30,
            continue_on_network_error: true,
            stop_on_conflict: false,
        }
    }
}

impl SchedulerConfig {
    /// Resolve the cascade: session preferences over project defaults
    /// over the built-in defaults.
    #[must_use]
    pub fn resolve(
        session: Option<&PullSchedulerDefaults>,
        project: Option<&PullSchedulerDefaults>,
    ) -> Self {
        let defaults = Self::default();
        let pick_bool = |get: fn(&PullSchedulerDefaults) -> Option<bool>, fallback: bool| {
            session
                .and_then(get)
                .or_else(|| project.and_then(get))
                .unwrap_or(fallback)
        };
        let interval = session
            .and_then(|p| p.default_interval_seconds)
            .or_else(|| project.and_then(|p| p.default_interval_seconds))
            .unwrap_or(defaults.pull_interval_seconds);

        Self {
            enabled: pick_bool(|p| p.default_enabled, defaults.enabled),
            pull_interval_seconds: interval.max(1),
            continue_on_network_error: pick_bool(
                |p| p.continue_on_network_error,
                defaults.continue_on_network_error,
            ),
            stop_on_conflict: pick_bool(|p| p.stop_on_conflict, defaults.stop_on_conflict),
        }
    }
}

/// Whether an error message looks like a transient network failure.
#[must_use]
pub fn is_network_error(message: &str) -> bool {
    let message = message.to_lowercase();
    ["network", "fetch", "timeout", "connection"]
        .iter()
        .any(|needle| message.contains(needle))
}

// ---------------------------------------------------------------------------
// Sync handle
// ---------------------------------------------------------------------------

/// The slice of the sync engine the scheduler drives.
#[async_trait]
pub trait SyncHandle: Send + Sync {
    /// Pull remote state with default options.
    async fn pull_state(&self) -> Result<PullResult, SyncError>;
}

#[async_trait]
impl SyncHandle for SyncEngine {
    async fn pull_state(&self) -> Result<PullResult, SyncError> {
        SyncEngine::pull_state(self, &PullOptions::default()).await
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct SchedulerInner {
    gitgov_dir: PathBuf,
    sync: Arc<dyn SyncHandle>,
    bus: EventBus,
    running: AtomicBool,
    pull_gate: Mutex<()>,
    config: RwLock<Option<SchedulerConfig>>,
    ticker: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Periodic background pull over a [`SyncHandle`].
///
/// Cloning shares the same scheduler.
#[derive(Clone)]
pub struct PullScheduler {
    inner: Arc<SchedulerInner>,
}

impl PullScheduler {
    /// Scheduler for the `.gitgov/` directory at `gitgov_dir`, pulling
    /// through `sync` and announcing on `bus`.
    #[must_use]
    pub fn new(gitgov_dir: impl Into<PathBuf>, sync: Arc<dyn SyncHandle>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                gitgov_dir: gitgov_dir.into(),
                sync,
                bus,
                running: AtomicBool::new(false),
                pull_gate: Mutex::new(()),
                config: RwLock::new(None),
                ticker: std::sync::Mutex::new(None),
            }),
        }
    }

    /// The resolved configuration, loading the cascade on first use.
    /// Load failures fall back to defaults silently.
    pub async fn config(&self) -> SchedulerConfig {
        if let Some(config) = *self.inner.config.read().await {
            return config;
        }

        let session = SessionManager::new(&self.inner.gitgov_dir).load().await;
        let project = ConfigManager::new(&self.inner.gitgov_dir)
            .load_or(GitgovConfig::new("unknown", "unknown"))
            .await;
        let resolved = SchedulerConfig::resolve(
            session.pull_scheduler.as_ref(),
            project
                .state
                .defaults
                .as_ref()
                .and_then(|d| d.pull_scheduler.as_ref()),
        );

        *self.inner.config.write().await = Some(resolved);
        resolved
    }

    /// Start the background ticker.
    ///
    /// Idempotent: a running scheduler is left alone. Returns whether the
    /// scheduler is running after the call — `false` means the resolved
    /// configuration has it disabled.
    pub async fn start(&self) -> bool {
        if self.is_running() {
            return true;
        }

        let config = self.config().await;
        if !config.enabled {
            info!("pull scheduler disabled by configuration");
            return false;
        }

        self.inner.running.store(true, Ordering::SeqCst);
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config.pull_interval_seconds));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so the first pull
            // happens one interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !scheduler.is_running() {
                    break;
                }
                if let Err(err) = scheduler.pull_now().await {
                    warn!(error = %err, "background pull failed");
                }
            }
        });
        *self.inner.ticker.lock().expect("ticker lock") = Some(handle);

        info!(
            interval = config.pull_interval_seconds,
            "pull scheduler started"
        );
        true
    }

    /// Stop the ticker. Idempotent. After this returns no new pull is
    /// started by the scheduler; a pull already in flight completes.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.ticker.lock().expect("ticker lock").take() {
            handle.abort();
        }
        info!("pull scheduler stopped");
    }

    /// Whether the ticker is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run one pull immediately.
    ///
    /// Re-entrant calls short-circuit: when a pull is already in flight
    /// the result is a successful no-op carrying `Pull already in
    /// progress`.
    ///
    /// # Errors
    ///
    /// Propagates [`SyncError`] except for transient network failures,
    /// which are swallowed into an unsuccessful [`PullResult`] when the
    /// configuration says to continue through them.
    pub async fn pull_now(&self) -> Result<PullResult, SyncError> {
        let Ok(_guard) = self.inner.pull_gate.try_lock() else {
            return Ok(PullResult {
                success: true,
                has_changes: false,
                error: Some("Pull already in progress".into()),
                ..Default::default()
            });
        };

        let config = self.config().await;
        match self.inner.sync.pull_state().await {
            Ok(result) if result.conflict_detected => {
                let conflict = result
                    .conflict_info
                    .as_ref()
                    .map(gitgov_sync::ConflictInfo::to_value)
                    .unwrap_or(serde_json::Value::Null);
                self.inner.bus.publish(GovEvent::ConflictDetected { conflict });
                if config.stop_on_conflict {
                    warn!("conflict detected; stopping pull scheduler");
                    self.stop();
                }
                Ok(result)
            }
            Ok(result) => {
                if result.has_changes {
                    self.inner
                        .bus
                        .publish(GovEvent::StateUpdated { has_changes: true });
                }
                Ok(result)
            }
            Err(err) => {
                let message = err.to_string();
                warn!(error = %message, "pull failed");
                if config.continue_on_network_error && is_network_error(&message) {
                    Ok(PullResult {
                        success: false,
                        error: Some(message),
                        ..Default::default()
                    })
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitgov_config::{SessionState, StateDefaults};
    use gitgov_sync::ConflictInfo;
    use tempfile::TempDir;

    struct ScriptedSync {
        results: Mutex<Vec<Result<PullResult, SyncError>>>,
    }

    impl ScriptedSync {
        fn new(results: Vec<Result<PullResult, SyncError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
            })
        }
    }

    #[async_trait]
    impl SyncHandle for ScriptedSync {
        async fn pull_state(&self) -> Result<PullResult, SyncError> {
            self.results.lock().await.pop().unwrap_or_else(|| {
                Ok(PullResult {
                    success: true,
                    ..Default::default()
                })
            })
        }
    }

    fn changes_result() -> Result<PullResult, SyncError> {
        Ok(PullResult {
            success: true,
            has_changes: true,
            files_updated: 2,
            reindexed: true,
            ..Default::default()
        })
    }

    fn conflict_result() -> Result<PullResult, SyncError> {
        Ok(PullResult {
            success: false,
            conflict_detected: true,
            conflict_info: Some(ConflictInfo::rebase(vec![
                ".gitgov/tasks/1700000000-task-x.json".into(),
            ])),
            ..Default::default()
        })
    }

    fn network_error() -> Result<PullResult, SyncError> {
        Err(SyncError::Git(gitgov_sync::GitError::Command {
            args: "fetch origin gitgov-state".into(),
            status: Some(128),
            stderr: "could not resolve host (network unreachable)".into(),
        }))
    }

    fn scheduler_with(
        results: Vec<Result<PullResult, SyncError>>,
    ) -> (PullScheduler, TempDir, EventBus) {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new();
        let scheduler = PullScheduler::new(dir.path(), ScriptedSync::new(results), bus.clone());
        (scheduler, dir, bus)
    }

    #[test]
    fn cascade_prefers_session_over_project_over_defaults() {
        let session = PullSchedulerDefaults {
            default_interval_seconds: Some(5),
            ..Default::default()
        };
        let project = PullSchedulerDefaults {
            default_enabled: Some(true),
            default_interval_seconds: Some(120),
            stop_on_conflict: Some(true),
            ..Default::default()
        };
        let config = SchedulerConfig::resolve(Some(&session), Some(&project));
        assert!(config.enabled); // project layer
        assert_eq!(config.pull_interval_seconds, 5); // session wins
        assert!(config.stop_on_conflict); // project layer
        assert!(config.continue_on_network_error); // built-in default

        let config = SchedulerConfig::resolve(None, None);
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn network_heuristic_matches_spec_keywords() {
        assert!(is_network_error("Network unreachable"));
        assert!(is_network_error("failed to fetch from origin"));
        assert!(is_network_error("operation timeout"));
        assert!(is_network_error("Connection refused"));
        assert!(!is_network_error("lint validation failed"));
    }

    #[tokio::test]
    async fn start_is_inert_when_disabled() {
        let (scheduler, _dir, _bus) = scheduler_with(vec![]);
        // Built-in default is disabled.
        assert!(!scheduler.start().await);
        assert!(!scheduler.is_running());
        scheduler.stop(); // idempotent on a stopped scheduler
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (scheduler, dir, _bus) = scheduler_with(vec![]);
        SessionManager::new(dir.path())
            .save(&SessionState {
                actor_id: None,
                pull_scheduler: Some(PullSchedulerDefaults {
                    default_enabled: Some(true),
                    default_interval_seconds: Some(3600),
                    ..Default::default()
                }),
            })
            .await
            .unwrap();

        assert!(scheduler.start().await);
        assert!(scheduler.is_running());
        assert!(scheduler.start().await); // no-op
        scheduler.stop();
        assert!(!scheduler.is_running());
        scheduler.stop(); // no-op
    }

    #[tokio::test]
    async fn project_defaults_enable_the_scheduler() {
        let (scheduler, dir, _bus) = scheduler_with(vec![]);
        let mut config = GitgovConfig::new("p", "P");
        config.state.defaults = Some(StateDefaults {
            pull_scheduler: Some(PullSchedulerDefaults {
                default_enabled: Some(true),
                default_interval_seconds: Some(3600),
                ..Default::default()
            }),
        });
        ConfigManager::new(dir.path()).save(&config).await.unwrap();

        assert!(scheduler.start().await);
        scheduler.stop();
    }

    #[tokio::test]
    async fn pull_now_emits_state_updated_on_changes() {
        let (scheduler, _dir, bus) = scheduler_with(vec![changes_result()]);
        let mut sub = bus.subscribe();

        let result = scheduler.pull_now().await.unwrap();
        assert!(result.has_changes);
        assert_eq!(
            sub.try_recv(),
            Some(GovEvent::StateUpdated { has_changes: true })
        );
    }

    #[tokio::test]
    async fn pull_now_emits_conflict_and_honors_stop_on_conflict() {
        let (scheduler, dir, bus) = scheduler_with(vec![conflict_result()]);
        SessionManager::new(dir.path())
            .save(&SessionState {
                actor_id: None,
                pull_scheduler: Some(PullSchedulerDefaults {
                    default_enabled: Some(true),
                    default_interval_seconds: Some(3600),
                    stop_on_conflict: Some(true),
                    ..Default::default()
                }),
            })
            .await
            .unwrap();
        assert!(scheduler.start().await);
        let mut sub = bus.subscribe();

        let result = scheduler.pull_now().await.unwrap();
        assert!(result.conflict_detected);
        assert!(matches!(
            sub.try_recv(),
            Some(GovEvent::ConflictDetected { .. })
        ));
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn network_errors_are_swallowed_when_configured() {
        let (scheduler, _dir, _bus) = scheduler_with(vec![network_error()]);
        // Default config: continue_on_network_error = true.
        let result = scheduler.pull_now().await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("network"));
    }

    #[tokio::test]
    async fn non_network_errors_propagate() {
        let (scheduler, _dir, _bus) =
            scheduler_with(vec![Err(SyncError::RebaseAlreadyInProgress)]);
        let err = scheduler.pull_now().await.unwrap_err();
        assert!(matches!(err, SyncError::RebaseAlreadyInProgress));
    }

    #[tokio::test]
    async fn reentrant_pull_short_circuits() {
        let (scheduler, _dir, _bus) = scheduler_with(vec![]);
        let _guard = scheduler.inner.pull_gate.lock().await;
        let result = scheduler.pull_now().await.unwrap();
        assert!(result.success);
        assert!(!result.has_changes);
        assert_eq!(result.error.as_deref(), Some("Pull already in progress"));
    }
}
