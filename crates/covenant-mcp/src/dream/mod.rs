//! Dream scheduler (C11): a single background task per project that wakes
//! every second, and once the client has been idle for `idle_timeout`, runs
//! the configured strategies until the client calls back in.

mod strategies;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use covenant_core::{DreamSession, Manager};
use tokio::sync::Notify;

const WAKE_INTERVAL: Duration = Duration::from_secs(1);
const COMMUNITY_STALENESS: chrono::Duration = chrono::Duration::hours(6);

/// Shared state the idle-monitor loop and `notify_tool_call` both touch.
struct SchedulerState {
    last_call: Instant,
}

pub struct DreamScheduler {
    manager: Arc<Manager>,
    project: String,
    config: covenant_core::config::DreamParams,
    state: Mutex<SchedulerState>,
    /// Set by `notify_tool_call` while dreaming; checked by strategies
    /// between units of work (§4.11 cooperative yield).
    user_active: Arc<AtomicBool>,
    wake: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl DreamScheduler {
    pub fn new(manager: Arc<Manager>, project: String, config: covenant_core::config::DreamParams) -> Arc<Self> {
        Arc::new(Self {
            manager,
            project,
            config,
            state: Mutex::new(SchedulerState { last_call: Instant::now() }),
            user_active: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Call on every incoming client tool invocation: resets the idle clock
    /// and, if dreaming, interrupts the running strategy.
    pub fn notify_tool_call(&self) {
        self.state.lock().expect("scheduler lock poisoned").last_call = Instant::now();
        self.user_active.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Server shutdown: stop the idle-monitor and release any strategy
    /// blocked on the `user_active` flag.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.user_active.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    fn idle_for(&self) -> Duration {
        self.state.lock().expect("scheduler lock poisoned").last_call.elapsed()
    }

    /// The idle-monitor loop. Spawn this once per project at startup.
    pub async fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let idle = self.idle_for();
            if idle >= self.config.idle_timeout {
                self.dream().await;
                self.state.lock().expect("scheduler lock poisoned").last_call = Instant::now();
                continue;
            }
            let remaining = self.config.idle_timeout - idle;
            tokio::time::sleep(remaining.min(WAKE_INTERVAL)).await;
        }
    }

    async fn dream(&self) {
        self.user_active.store(false, Ordering::SeqCst);
        let mut session = DreamSession::new(self.project.clone());
        let storage = self.manager.storage();

        session.strategies_run.push("failed_decision_review".to_string());
        let (results, interrupted) =
            strategies::failed_decision_review(storage, &self.manager, &self.project, &self.config, &self.user_active);
        session.decisions_reviewed += results.len() as u32;
        session.insights_generated += results.len() as u32;
        session.interrupted |= interrupted;
        session.results.extend(results);

        if !self.user_active.load(Ordering::SeqCst) {
            session.strategies_run.push("connection_discovery".to_string());
            let (_created, interrupted) =
                strategies::connection_discovery(storage, &self.manager, &self.project, &self.config, &self.user_active);
            session.interrupted |= interrupted;
        }

        if !self.user_active.load(Ordering::SeqCst) {
            session.strategies_run.push("community_refresh".to_string());
            strategies::community_refresh(storage, &self.project, COMMUNITY_STALENESS);
        }

        if !self.user_active.load(Ordering::SeqCst) {
            session.strategies_run.push("pending_outcome_resolver".to_string());
            let (results, interrupted) =
                strategies::pending_outcome_resolver(storage, &self.manager, &self.project, &self.config, &self.user_active);
            session.insights_generated += results.len() as u32;
            session.interrupted |= interrupted;
            session.results.extend(results);
        }

        session.ended_at = Some(Utc::now());
        if let Err(e) = storage.insert_dream_session(&session) {
            tracing::warn!(error = %e, "failed to persist dream session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::{Config, Storage};

    fn test_manager(project: &str) -> Arc<Manager> {
        let storage = Storage::open_in_memory(project).unwrap();
        Arc::new(Manager::new(storage, Config::default()).unwrap())
    }

    #[tokio::test]
    async fn notify_tool_call_resets_idle_clock() {
        let manager = test_manager("dream-test");
        let scheduler = DreamScheduler::new(manager, "dream-test".to_string(), covenant_core::config::DreamParams::default());
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.notify_tool_call();
        assert!(scheduler.idle_for() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn stop_marks_scheduler_not_running() {
        let manager = test_manager("dream-test2");
        let scheduler = DreamScheduler::new(manager, "dream-test2".to_string(), covenant_core::config::DreamParams::default());
        scheduler.stop();
        assert!(!scheduler.running.load(Ordering::SeqCst));
    }
}
