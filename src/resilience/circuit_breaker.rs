//! Circuit breaker for destination protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: destination assumed down, requests fail fast
//! - Half-Open: a bounded number of probes test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures within window >= failure_threshold
//! Open → Half-Open: first admission after open_timeout has elapsed
//! Half-Open → Closed: success_threshold probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - Per-destination circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Bounded probes in Half-Open (prevents hammering recovering destination)
//! - Admission hands out a [`CircuitPermit`]; dropping it unresolved
//!   (cancellation) frees a probe slot without recording an outcome
//! - Results are tagged with the state generation they were admitted in, so
//!   late results from an earlier phase never drive a transition

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::Error;
use crate::security::ssrf::Destination;
use crate::transport::Response;

/// Retry hint given to calls rejected because all probe slots are taken.
const PROBE_BUSY_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half_open",
        }
    }
}

/// How an outcome counts toward the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
    /// Neither; only releases a probe slot.
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: CircuitPhase,
    pub to: CircuitPhase,
}

/// Outcome of asking the state machine for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit { probe: bool, generation: u64 },
    Reject { retry_after: Duration },
}

/// Per-destination breaker state.
#[derive(Debug, Clone)]
pub struct CircuitState {
    phase: CircuitPhase,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    last_transition: Instant,
    probes_in_flight: u32,
    probe_successes: u32,
    generation: u64,
}

impl CircuitState {
    pub fn new(now: Instant) -> Self {
        Self {
            phase: CircuitPhase::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            last_transition: now,
            probes_in_flight: 0,
            probe_successes: 0,
            generation: 0,
        }
    }

    pub fn phase(&self) -> CircuitPhase {
        self.phase
    }

    fn move_to(&mut self, to: CircuitPhase, now: Instant) -> Transition {
        let from = self.phase;
        self.phase = to;
        self.last_transition = now;
        self.generation += 1;
        self.probes_in_flight = 0;
        self.probe_successes = 0;
        match to {
            CircuitPhase::Open => self.opened_at = Some(now),
            CircuitPhase::Closed => {
                self.failures.clear();
                self.opened_at = None;
            }
            CircuitPhase::HalfOpen => {}
        }
        Transition { from, to }
    }

    /// Ask for admission. May move Open → Half-Open.
    pub fn admit(&mut self, config: &CircuitBreakerConfig, now: Instant) -> (Decision, Option<Transition>) {
        let mut transition = None;

        if self.phase == CircuitPhase::Open {
            let opened_at = self.opened_at.unwrap_or(now);
            let elapsed = now.saturating_duration_since(opened_at);
            let timeout = config.open_timeout();
            if elapsed < timeout {
                return (
                    Decision::Reject {
                        retry_after: timeout - elapsed,
                    },
                    None,
                );
            }
            transition = Some(self.move_to(CircuitPhase::HalfOpen, now));
        }

        let decision = match self.phase {
            CircuitPhase::Closed => Decision::Admit {
                probe: false,
                generation: self.generation,
            },
            CircuitPhase::HalfOpen if self.probes_in_flight < config.half_open_max_calls => {
                self.probes_in_flight += 1;
                Decision::Admit {
                    probe: true,
                    generation: self.generation,
                }
            }
            _ => Decision::Reject {
                retry_after: PROBE_BUSY_RETRY_AFTER,
            },
        };
        (decision, transition)
    }

    /// Record the result of a call admitted in `generation`.
    pub fn on_result(
        &mut self,
        config: &CircuitBreakerConfig,
        generation: u64,
        verdict: Verdict,
        now: Instant,
    ) -> Option<Transition> {
        if generation != self.generation {
            return None;
        }

        match self.phase {
            CircuitPhase::Closed => match verdict {
                Verdict::Success => {
                    self.failures.clear();
                    None
                }
                Verdict::Failure => {
                    self.failures.push_back(now);
                    let window = config.window();
                    while let Some(&oldest) = self.failures.front() {
                        if now.saturating_duration_since(oldest) > window {
                            self.failures.pop_front();
                        } else {
                            break;
                        }
                    }
                    if self.failures.len() >= config.failure_threshold as usize {
                        Some(self.move_to(CircuitPhase::Open, now))
                    } else {
                        None
                    }
                }
                Verdict::Neutral => None,
            },
            CircuitPhase::HalfOpen => {
                self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
                match verdict {
                    Verdict::Success => {
                        self.probe_successes += 1;
                        if self.probe_successes >= config.success_threshold {
                            Some(self.move_to(CircuitPhase::Closed, now))
                        } else {
                            None
                        }
                    }
                    Verdict::Failure => Some(self.move_to(CircuitPhase::Open, now)),
                    Verdict::Neutral => None,
                }
            }
            CircuitPhase::Open => None,
        }
    }

    /// Free a probe slot held by an abandoned call.
    pub fn release_probe(&mut self, generation: u64) {
        if generation == self.generation && self.phase == CircuitPhase::HalfOpen {
            self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
        }
    }
}

/// Receives every state transition, outside the breaker lock.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, destination: &str, transition: Transition);
}

/// Breaker for a single destination.
pub struct CircuitBreaker {
    destination: String,
    config: Arc<CircuitBreakerConfig>,
    state: Mutex<CircuitState>,
    listener: Option<Arc<dyn TransitionListener>>,
}

impl CircuitBreaker {
    fn notify(&self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        tracing::info!(
            destination = %self.destination,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            "Circuit state changed"
        );
        if let Some(listener) = &self.listener {
            listener.on_transition(&self.destination, transition);
        }
    }

    pub fn phase(&self) -> CircuitPhase {
        self.state.lock().phase()
    }

    /// Admit a call or fail fast with `Error::CircuitOpen`.
    pub fn acquire(self: &Arc<Self>) -> Result<CircuitPermit, Error> {
        let (decision, transition) = self.state.lock().admit(&self.config, Instant::now());
        self.notify(transition);

        match decision {
            Decision::Admit { probe, generation } => Ok(CircuitPermit {
                breaker: self.clone(),
                generation,
                probe,
                resolved: false,
            }),
            Decision::Reject { retry_after } => Err(Error::CircuitOpen {
                destination: self.destination.clone(),
                retry_after,
            }),
        }
    }

    fn snapshot(&self) -> CircuitSnapshot {
        let now = Instant::now();
        let state = self.state.lock();
        CircuitSnapshot {
            destination: self.destination.clone(),
            phase: state.phase,
            recent_failures: state.failures.len(),
            probes_in_flight: state.probes_in_flight,
            since_transition_ms: now.saturating_duration_since(state.last_transition).as_millis() as u64,
        }
    }
}

/// Admission token for one call through a breaker.
///
/// Resolve with [`CircuitPermit::record`]. Dropping it unresolved releases
/// any probe slot without counting an outcome.
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    probe: bool,
    resolved: bool,
}

impl CircuitPermit {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record(mut self, verdict: Verdict) {
        self.resolved = true;
        let transition = self.breaker.state.lock().on_result(
            &self.breaker.config,
            self.generation,
            verdict,
            Instant::now(),
        );
        self.breaker.notify(transition);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.state.lock().release_probe(self.generation);
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub destination: String,
    pub phase: CircuitPhase,
    pub recent_failures: usize,
    pub probes_in_flight: u32,
    pub since_transition_ms: u64,
}

/// Registry of breakers keyed by destination.
pub struct CircuitBreakerRegistry {
    config: Arc<CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    listener: Option<Arc<dyn TransitionListener>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            breakers: DashMap::new(),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn get(&self, destination: &Destination) -> Arc<CircuitBreaker> {
        let key = destination.to_string();
        self.breakers
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker {
                    destination: key,
                    config: self.config.clone(),
                    state: Mutex::new(CircuitState::new(Instant::now())),
                    listener: self.listener.clone(),
                })
            })
            .clone()
    }

    /// Classify an attempt outcome.
    pub fn verdict(&self, outcome: &Result<Response, Error>) -> Verdict {
        match outcome {
            Ok(response) if self.config.failure_status_codes.contains(&response.status.as_u16()) => {
                Verdict::Failure
            }
            Ok(_) => Verdict::Success,
            Err(Error::Transport(_)) | Err(Error::Timeout(_)) => Verdict::Failure,
            Err(_) => Verdict::Neutral,
        }
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        all.sort_by(|a, b| a.destination.cmp(&b.destination));
        all
    }
}
