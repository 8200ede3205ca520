//! Per-domain circuit breaker.
//!
//! Each remote domain gets an independent failure counter. After a fixed
//! number of consecutive failures the circuit opens and calls fail fast
//! without touching the network. When the cooldown elapses exactly one
//! half-open trial is let through: success closes the circuit, failure
//! reopens it and restarts the cooldown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Consecutive failures before a domain's circuit opens.
pub const FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit blocks calls before allowing a trial.
pub const COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Closed,
    Open,
    /// A single trial request is in flight.
    HalfOpen,
}

#[derive(Debug)]
struct DomainState {
    position: Position,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Last request start, for the politeness delay.
    last_request: Option<Instant>,
}

impl DomainState {
    fn new() -> Self {
        Self {
            position: Position::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_request: None,
        }
    }
}

/// Outcome of asking the breaker for permission to call a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal call through a closed circuit.
    Allowed,
    /// The one post-cooldown trial call.
    Trial,
    /// Fail fast; remaining cooldown attached.
    Rejected(Duration),
}

/// Circuit breaker keyed by domain. Safe under concurrent runs: all state
/// lives behind one async mutex and each domain's entry is independent.
#[derive(Clone)]
pub struct CircuitBreaker {
    states: Arc<Mutex<HashMap<String, DomainState>>>,
    threshold: u32,
    cooldown: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(FAILURE_THRESHOLD, COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            threshold,
            cooldown,
        }
    }

    /// Ask permission to call `domain`. Must be followed by exactly one
    /// `report_success` or `report_failure` when admitted.
    pub async fn admit(&self, domain: &str) -> Admission {
        let mut states = self.states.lock().await;
        let state = states
            .entry(domain.to_string())
            .or_insert_with(DomainState::new);

        match state.position {
            Position::Closed => Admission::Allowed,
            Position::HalfOpen => {
                // Trial already in flight; treat as still cooling down.
                Admission::Rejected(self.cooldown)
            }
            Position::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    state.position = Position::HalfOpen;
                    Admission::Trial
                } else {
                    Admission::Rejected(self.cooldown - elapsed)
                }
            }
        }
    }

    /// Record a successful response for `domain`.
    pub async fn report_success(&self, domain: &str) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(domain) {
            state.consecutive_failures = 0;
            state.position = Position::Closed;
            state.opened_at = None;
        }
    }

    /// Record a failed request for `domain`. Opens the circuit at the
    /// threshold; a failed half-open trial reopens immediately.
    pub async fn report_failure(&self, domain: &str) {
        let mut states = self.states.lock().await;
        let state = states
            .entry(domain.to_string())
            .or_insert_with(DomainState::new);

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let reopen = state.position == Position::HalfOpen
            || state.consecutive_failures >= self.threshold;
        if reopen {
            state.position = Position::Open;
            state.opened_at = Some(Instant::now());
        }
    }

    /// How long to wait before the next request to `domain` to honour the
    /// per-domain politeness delay. Updates the last-request marker.
    pub async fn politeness_wait(&self, domain: &str, delay: Duration) -> Duration {
        let mut states = self.states.lock().await;
        let state = states
            .entry(domain.to_string())
            .or_insert_with(DomainState::new);

        let wait = match state.last_request {
            Some(last) => delay.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };
        state.last_request = Some(Instant::now() + wait);
        wait
    }

    /// Whether the circuit for `domain` is currently open.
    pub async fn is_open(&self, domain: &str) -> bool {
        let states = self.states.lock().await;
        states
            .get(domain)
            .map(|s| s.position != Position::Closed)
            .unwrap_or(false)
    }

    /// Current consecutive-failure count for `domain`.
    pub async fn failure_count(&self, domain: &str) -> u32 {
        let states = self.states.lock().await;
        states
            .get(domain)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }
}
