//! Three-state circuit breaker.
//!
//! ```text
//! Closed   -> Open      failure recorded, requests >= min_requests and
//!                       failures / requests >= failure_ratio
//! Open     -> HalfOpen  open_timeout elapsed (observed on the next call or query)
//! HalfOpen -> Closed    half_open_max_requests consecutive successes
//! HalfOpen -> Open      any failure
//! ```
//!
//! Every transition starts a new generation with zeroed counts. Outcomes of
//! calls admitted in an earlier generation are discarded.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl core::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts for the current generation.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    /// Failure share of admitted requests, 0.0 when nothing was admitted.
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        f64::from(self.total_failures) / f64::from(self.requests)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    pub name: String,
    /// Requests needed in a generation before the ratio is considered.
    pub min_requests: u32,
    pub failure_ratio: f64,
    pub open_timeout: Duration,
    /// Trial calls admitted while half-open, and the successes needed to close.
    pub half_open_max_requests: u32,
    /// Counts are cleared this often while closed. `Duration::ZERO` never clears.
    pub interval: Duration,
}

impl BreakerSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            min_requests: 3,
            failure_ratio: 0.6,
            open_timeout: Duration::from_secs(10),
            half_open_max_requests: 3,
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Rejected without running the operation.
    #[error("circuit breaker '{name}' is {state}")]
    CircuitOpen { name: String, state: CircuitState },

    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
}

/// Receives `(name, from, to)` for every transition.
pub type StateObserver = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

type Transition = (CircuitState, CircuitState);

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    /// Closed: when counts are next cleared. Open: when half-open is allowed.
    expiry: Option<Instant>,
    changed_at: Instant,
}

pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
    observer: Option<StateObserver>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        let now = Instant::now();
        let expiry = (!settings.interval.is_zero()).then(|| now + settings.interval);
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
                changed_at: now,
            }),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Current state, applying any transition that is due.
    pub fn state(&self) -> CircuitState {
        let mut transitions = Vec::new();
        let state = {
            let mut inner = self.lock();
            self.refresh(&mut inner, Instant::now(), &mut transitions);
            inner.state
        };
        self.notify(transitions);
        state
    }

    pub fn counts(&self) -> Counts {
        let mut transitions = Vec::new();
        let counts = {
            let mut inner = self.lock();
            self.refresh(&mut inner, Instant::now(), &mut transitions);
            inner.counts
        };
        self.notify(transitions);
        counts
    }

    /// Time the breaker last changed state.
    pub fn last_transition(&self) -> Instant {
        self.lock().changed_at
    }

    /// Run `op` if the breaker admits it, recording `Ok` as success and `Err`
    /// as failure.
    ///
    /// A call that is dropped or panics before completing is recorded as a
    /// failure.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let generation = self.before_call().map_err(|state| BreakerError::CircuitOpen {
            name: self.settings.name.clone(),
            state,
        })?;

        let mut guard = CallGuard {
            breaker: self,
            generation,
            armed: true,
        };
        let result = op().await;
        guard.armed = false;

        self.after_call(generation, result.is_ok());
        result.map_err(BreakerError::Operation)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is only mutated through whole transitions, so a poisoned
        // lock still holds a consistent value.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn before_call(&self) -> Result<u64, CircuitState> {
        let mut transitions = Vec::new();
        let admitted = {
            let mut inner = self.lock();
            self.refresh(&mut inner, Instant::now(), &mut transitions);
            match inner.state {
                CircuitState::Open => Err(CircuitState::Open),
                CircuitState::HalfOpen
                    if inner.counts.requests >= self.settings.half_open_max_requests =>
                {
                    Err(CircuitState::HalfOpen)
                }
                _ => {
                    inner.counts.on_request();
                    Ok(inner.generation)
                }
            }
        };
        self.notify(transitions);
        admitted
    }

    fn after_call(&self, generation: u64, success: bool) {
        let mut transitions = Vec::new();
        {
            let mut inner = self.lock();
            let now = Instant::now();
            self.refresh(&mut inner, now, &mut transitions);
            if inner.generation == generation {
                if success {
                    self.on_success(&mut inner, now, &mut transitions);
                } else {
                    self.on_failure(&mut inner, now, &mut transitions);
                }
            }
        }
        self.notify(transitions);
    }

    fn refresh(&self, inner: &mut Inner, now: Instant, transitions: &mut Vec<Transition>) {
        match inner.state {
            CircuitState::Closed => {
                if inner.expiry.is_some_and(|at| at <= now) {
                    self.new_generation(inner, now);
                }
            }
            CircuitState::Open => {
                if inner.expiry.is_some_and(|at| at <= now) {
                    self.set_state(inner, CircuitState::HalfOpen, now, transitions);
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn on_success(&self, inner: &mut Inner, now: Instant, transitions: &mut Vec<Transition>) {
        inner.counts.on_success();
        if inner.state == CircuitState::HalfOpen
            && inner.counts.consecutive_successes >= self.settings.half_open_max_requests
        {
            self.set_state(inner, CircuitState::Closed, now, transitions);
        }
    }

    fn on_failure(&self, inner: &mut Inner, now: Instant, transitions: &mut Vec<Transition>) {
        match inner.state {
            CircuitState::Closed => {
                inner.counts.on_failure();
                if self.ready_to_trip(&inner.counts) {
                    self.set_state(inner, CircuitState::Open, now, transitions);
                }
            }
            CircuitState::HalfOpen => self.set_state(inner, CircuitState::Open, now, transitions),
            CircuitState::Open => {}
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.settings.min_requests
            && counts.failure_ratio() >= self.settings.failure_ratio
    }

    fn set_state(
        &self,
        inner: &mut Inner,
        to: CircuitState,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        inner.changed_at = now;
        self.new_generation(inner, now);
        transitions.push((from, to));
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed if self.settings.interval.is_zero() => None,
            CircuitState::Closed => Some(now + self.settings.interval),
            CircuitState::Open => Some(now + self.settings.open_timeout),
            CircuitState::HalfOpen => None,
        };
    }

    fn notify(&self, transitions: Vec<Transition>) {
        for (from, to) in transitions {
            tracing::info!(
                breaker = %self.settings.name,
                from = %from,
                to = %to,
                "circuit breaker state changed"
            );
            if let Some(observer) = &self.observer {
                observer(&self.settings.name, from, to);
            }
        }
    }
}

impl core::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("settings", &self.settings)
            .field("inner", &*self.lock())
            .finish_non_exhaustive()
    }
}

/// Records a failure if the admitted call never reports back.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    armed: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.after_call(self.generation, false);
        }
    }
}
