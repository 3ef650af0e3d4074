//! Containment gate for incident notifications.
//!
//! Limits how many incidents reach the notifier during a crash loop while
//! still letting isolated incidents through.
//!
//! # States
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Containment Gate                          │
//! │                                                                  │
//! │  ┌───────────┐  threshold admitted within window  ┌────────────┐ │
//! │  │ Reporting │ ──────────────────────────────────► │ Suppressed │ │
//! │  │ (admit)   │                                     │ (drop)     │ │
//! │  └─────▲─────┘                                     └──────┬─────┘ │
//! │        │               cool-down elapsed                  │       │
//! │        └──────────────────────────────────────────────────┘       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Configuration
//!
//! - `threshold`: incidents admitted per window before the gate trips
//! - `window`: sliding window over which admitted incidents are counted
//! - `cooldown`: how long the gate stays suppressed once tripped
//!
//! With a threshold of N, N incidents inside one window are admitted and the
//! (N+1)th trips the gate and is dropped. When the cool-down has elapsed the
//! window is cleared and reporting resumes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    /// Incidents are admitted.
    Reporting,
    /// Incidents are dropped until the cool-down elapses.
    Suppressed,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateState::Reporting => write!(f, "reporting"),
            GateState::Suppressed => write!(f, "suppressed"),
        }
    }
}

/// Configuration for the containment gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Incidents admitted per window before the gate trips.
    pub threshold: u32,
    /// Sliding window over which admitted incidents are counted.
    pub window: Duration,
    /// How long the gate suppresses once tripped.
    pub cooldown: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }
}

impl GateConfig {
    pub fn new(threshold: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            threshold,
            window,
            cooldown,
        }
    }
}

struct GateInner {
    /// Admission instants still inside the window, oldest first.
    admitted_at: VecDeque<Instant>,
    /// Set while tripped.
    suppressed_until: Option<Instant>,
}

/// Thread-safe sliding-window gate shared by every request's recovery path.
///
/// The lock is held only for the duration of a single admission decision and
/// is never held across an `.await`.
pub struct ContainmentGate {
    config: GateConfig,
    inner: Mutex<GateInner>,
    admitted: AtomicU64,
    suppressed: AtomicU64,
    times_tripped: AtomicU64,
}

impl ContainmentGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            inner: Mutex::new(GateInner {
                admitted_at: VecDeque::with_capacity(config.threshold as usize),
                suppressed_until: None,
            }),
            config,
            admitted: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            times_tripped: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Decide whether an incident occurring now may be reported.
    pub fn admit(&self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Decide whether an incident occurring at `now` may be reported.
    pub fn admit_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();

        if let Some(until) = inner.suppressed_until {
            if now < until {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            inner.suppressed_until = None;
            inner.admitted_at.clear();
            info!("Containment gate cool-down elapsed, reporting resumed");
        }

        while let Some(oldest) = inner.admitted_at.front()
            && now.saturating_duration_since(*oldest) >= self.config.window
        {
            inner.admitted_at.pop_front();
        }

        if inner.admitted_at.len() >= self.config.threshold as usize {
            inner.suppressed_until = Some(now + self.config.cooldown);
            self.times_tripped.fetch_add(1, Ordering::Relaxed);
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            warn!(
                threshold = self.config.threshold,
                window = ?self.config.window,
                cooldown = ?self.config.cooldown,
                "Containment gate tripped, suppressing incident notifications"
            );
            return false;
        }

        inner.admitted_at.push_back(now);
        self.admitted.fetch_add(1, Ordering::Relaxed);
        debug!(
            in_window = inner.admitted_at.len(),
            threshold = self.config.threshold,
            "Containment gate admitted incident"
        );
        true
    }

    /// Current state. A gate whose cool-down has elapsed reports
    /// `Reporting` even before the next admission resets it.
    pub fn state(&self) -> GateState {
        match self.lock().suppressed_until {
            Some(until) if Instant::now() < until => GateState::Suppressed,
            _ => GateState::Reporting,
        }
    }

    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn times_tripped(&self) -> u64 {
        self.times_tripped.load(Ordering::Relaxed)
    }

    /// Clear the window and any active suppression.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.admitted_at.clear();
        inner.suppressed_until = None;
        info!("Containment gate reset");
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        // State is a window of instants; a panic mid-update cannot leave it invalid.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ContainmentGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_reporting() {
        let gate = ContainmentGate::default();
        assert_eq!(gate.state(), GateState::Reporting);
        assert!(gate.admit());
        assert_eq!(gate.admitted(), 1);
    }

    #[test]
    fn test_gate_trips_after_threshold() {
        let gate = ContainmentGate::new(GateConfig::new(
            3,
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let now = Instant::now();

        assert!(gate.admit_at(now));
        assert!(gate.admit_at(now));
        assert!(gate.admit_at(now));
        assert_eq!(gate.state(), GateState::Reporting);

        assert!(!gate.admit_at(now));
        assert_eq!(gate.state(), GateState::Suppressed);
        assert_eq!(gate.admitted(), 3);
        assert_eq!(gate.suppressed(), 1);
        assert_eq!(gate.times_tripped(), 1);
    }

    #[test]
    fn test_gate_suppresses_until_cooldown() {
        let gate = ContainmentGate::new(GateConfig::new(
            1,
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        let start = Instant::now();

        assert!(gate.admit_at(start));
        assert!(!gate.admit_at(start + Duration::from_secs(1)));
        assert!(!gate.admit_at(start + Duration::from_secs(30)));
        assert_eq!(gate.suppressed(), 2);
        assert_eq!(gate.times_tripped(), 1);

        assert!(gate.admit_at(start + Duration::from_secs(32)));
        assert_eq!(gate.admitted(), 2);
    }

    #[test]
    fn test_window_slides() {
        let gate = ContainmentGate::new(GateConfig::new(
            2,
            Duration::from_secs(10),
            Duration::from_secs(60),
        ));
        let start = Instant::now();

        assert!(gate.admit_at(start));
        assert!(gate.admit_at(start + Duration::from_secs(5)));
        // First admission has left the window.
        assert!(gate.admit_at(start + Duration::from_secs(11)));
        assert_eq!(gate.times_tripped(), 0);

        assert!(!gate.admit_at(start + Duration::from_secs(12)));
        assert_eq!(gate.times_tripped(), 1);
    }

    #[test]
    fn test_gate_resumes_with_real_clock() {
        let gate = ContainmentGate::new(GateConfig::new(
            1,
            Duration::from_secs(60),
            Duration::from_millis(10),
        ));

        assert!(gate.admit());
        assert!(!gate.admit());
        assert_eq!(gate.state(), GateState::Suppressed);

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(gate.state(), GateState::Reporting);
        assert!(gate.admit());
    }

    #[test]
    fn test_reset() {
        let gate = ContainmentGate::new(GateConfig::new(
            1,
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        assert!(gate.admit());
        assert!(!gate.admit());

        gate.reset();

        assert_eq!(gate.state(), GateState::Reporting);
        assert!(gate.admit());
    }

    #[test]
    fn test_concurrent_admissions_respect_threshold() {
        let gate = std::sync::Arc::new(ContainmentGate::new(GateConfig::new(
            5,
            Duration::from_secs(60),
            Duration::from_secs(60),
        )));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.admit())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 5);
        assert_eq!(gate.admitted(), 5);
        assert_eq!(gate.suppressed(), 11);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(GateState::Reporting.to_string(), "reporting");
        assert_eq!(GateState::Suppressed.to_string(), "suppressed");
    }
}
