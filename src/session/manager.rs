//! Process-wide table of client sessions.

use super::types::Session;
use serde::Serialize;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One entry in the session table.
///
/// The session itself sits behind an async mutex: every operation on a session
/// holds it for its whole duration, so calls against one session run one at a
/// time in arrival order while distinct sessions proceed in parallel.
pub struct SessionSlot {
    id: String,
    session: tokio::sync::Mutex<Session>,
    last_used: Mutex<Instant>,
}

impl SessionSlot {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            session: tokio::sync::Mutex::new(Session::new(id)),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for exclusive access to the session.
    ///
    /// The idle clock restarts both when the lock is taken and when the
    /// returned guard is dropped.
    pub async fn lock(&self) -> SessionGuard<'_> {
        let guard = self.session.lock().await;
        self.touch();
        SessionGuard { slot: self, guard }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }
}

/// Exclusive access to a [`Session`]; marks the slot as used on drop.
pub struct SessionGuard<'a> {
    slot: &'a SessionSlot,
    guard: MutexGuard<'a, Session>,
}

impl Deref for SessionGuard<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.slot.touch();
    }
}

/// Maps session IDs to sessions, creating them on first use.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the session for `id`, creating it if this is the first reference.
    ///
    /// Concurrent first references to the same id yield the same session.
    pub async fn get_or_create(&self, id: &str) -> Arc<SessionSlot> {
        if let Some(slot) = self.sessions.read().await.get(id) {
            return slot.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                info!(session_id = %id, "Session created");
                Arc::new(SessionSlot::new(id))
            })
            .clone()
    }

    /// Look up an existing session without creating one.
    pub async fn get(&self, id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove sessions idle for longer than `max_idle`.
    ///
    /// A session is kept while any caller still holds a reference to it or its
    /// lock is held, regardless of idle time.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let mut sessions = self.sessions.write().await;
        let mut evicted = Vec::new();
        sessions.retain(|id, slot| {
            let idle = slot.idle_for() > max_idle;
            let unreferenced = Arc::strong_count(slot) == 1;
            let unlocked = slot.session.try_lock().is_ok();
            if idle && unreferenced && unlocked {
                evicted.push(id.clone());
                false
            } else {
                true
            }
        });
        for id in &evicted {
            info!(session_id = %id, "Evicted idle session");
        }
        evicted
    }

    /// Get session statistics.
    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let mut stats = SessionStats {
            total_sessions: sessions.len(),
            ..SessionStats::default()
        };
        for slot in sessions.values() {
            match slot.session.try_lock() {
                Ok(session) if session.pipeline.is_some() => stats.sessions_with_pipeline += 1,
                Ok(_) => {}
                Err(_) => stats.busy_sessions += 1,
            }
        }
        stats
    }

    /// Periodically evict idle sessions until `cancel` fires.
    pub async fn run_reaper(
        self: Arc<Self>,
        max_idle: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.evict_idle(max_idle).await;
                    let stats = self.stats().await;
                    debug!(
                        evicted = evicted.len(),
                        total = stats.total_sessions,
                        with_pipeline = stats.sessions_with_pipeline,
                        busy = stats.busy_sessions,
                        "Session sweep"
                    );
                }
            }
        }
        debug!("Session reaper stopped");
    }
}

/// Statistics about sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub sessions_with_pipeline: usize,
    /// Sessions with an operation in flight when sampled.
    pub busy_sessions: usize,
}
