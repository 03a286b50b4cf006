//! Bounded session pool with scoped acquisition.
//!
//! A [`PooledSession`] goes back to the pool when dropped, whichever way
//! the batch that held it ended. Sessions that saw a fatal error can be
//! discarded instead of returned.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

use super::{GraphBackend, StoreResult};

#[derive(Debug)]
struct PoolState<S> {
    idle: Vec<S>,
    open: usize,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub max: usize,
}

/// At most `max` sessions of one backend open at a time.
pub struct SessionPool<B: GraphBackend> {
    backend: B,
    state: Mutex<PoolState<B::Session>>,
    available: Condvar,
    max: usize,
    acquire_timeout: Duration,
}

impl<B: GraphBackend> SessionPool<B> {
    /// `max` is clamped to at least one session.
    pub fn new(backend: B, max: usize, acquire_timeout: Duration) -> Self {
        Self {
            backend,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
            max: max.max(1),
            acquire_timeout,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Take an idle session, open a new one below the limit, or wait up to
    /// the acquire timeout for one to be returned.
    ///
    /// The timeout covers the whole call, spurious wakeups included, and
    /// fails with [`StoreError::PoolExhausted`]. Waiters are not served in
    /// arrival order: a returned session goes to whichever thread wakes
    /// first.
    pub fn acquire(&self) -> StoreResult<PooledSession<'_, B>> {
        let started = Instant::now();
        let deadline = started + self.acquire_timeout;
        let mut state = self.state.lock().expect("session pool lock poisoned");
        loop {
            if let Some(session) = state.idle.pop() {
                return Ok(self.wrap(session));
            }
            if state.open < self.max {
                state.open += 1;
                drop(state);
                return match self.backend.open_session() {
                    Ok(session) => {
                        tracing::trace!(backend = self.backend.name(), "session opened");
                        Ok(self.wrap(session))
                    }
                    Err(e) => {
                        self.forget_one();
                        Err(e)
                    }
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::PoolExhausted {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .expect("session pool lock poisoned");
            state = guard;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock().expect("session pool lock poisoned");
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
            max: self.max,
        }
    }

    fn wrap(&self, session: B::Session) -> PooledSession<'_, B> {
        PooledSession {
            pool: self,
            session: Some(session),
            discard: false,
        }
    }

    fn give_back(&self, session: B::Session) {
        let mut state = self.state.lock().expect("session pool lock poisoned");
        state.idle.push(session);
        self.available.notify_one();
    }

    fn forget_one(&self) {
        let mut state = self.state.lock().expect("session pool lock poisoned");
        state.open = state.open.saturating_sub(1);
        self.available.notify_one();
    }
}

impl<B: GraphBackend> std::fmt::Debug for SessionPool<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("backend", &self.backend.name())
            .field("stats", &self.stats())
            .finish()
    }
}

/// A session borrowed from a [`SessionPool`].
pub struct PooledSession<'p, B: GraphBackend> {
    pool: &'p SessionPool<B>,
    session: Option<B::Session>,
    discard: bool,
}

impl<B: GraphBackend> PooledSession<'_, B> {
    /// Close the session on drop instead of returning it.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl<B: GraphBackend> Deref for PooledSession<'_, B> {
    type Target = B::Session;

    fn deref(&self) -> &B::Session {
        // Only `Drop` takes the session out.
        self.session.as_ref().expect("pooled session used after release")
    }
}

impl<B: GraphBackend> DerefMut for PooledSession<'_, B> {
    fn deref_mut(&mut self) -> &mut B::Session {
        self.session.as_mut().expect("pooled session used after release")
    }
}

impl<B: GraphBackend> Drop for PooledSession<'_, B> {
    fn drop(&mut self) {
        match self.session.take() {
            Some(session) if !self.discard => self.pool.give_back(session),
            _ => self.pool.forget_one(),
        }
    }
}
