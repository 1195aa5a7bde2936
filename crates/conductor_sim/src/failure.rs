//! Failure injection for resource operations.
//!
//! A [`FailurePlan`] decides, per operation, whether a simulated resource
//! should fail. Failures are either scripted (fail the next `n` commits) or
//! drawn from a seeded random model so a failing run can be replayed.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operation at which a failure can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePoint {
    /// Acquiring a db handle
    Acquire,
    /// Running a statement
    Execute,
    /// Committing a handle
    Commit,
    /// Rolling back a handle
    Rollback,
    /// Releasing a handle
    Release,
    /// Beginning an external transaction
    Begin,
    /// Committing an external transaction
    ExternalCommit,
    /// Borrowing a messaging session
    Borrow,
    /// Sending a message
    Send,
    /// Returning a messaging session
    Return,
}

impl FailurePoint {
    /// Every point, in declaration order
    pub const ALL: [FailurePoint; 10] = [
        Self::Acquire,
        Self::Execute,
        Self::Commit,
        Self::Rollback,
        Self::Release,
        Self::Begin,
        Self::ExternalCommit,
        Self::Borrow,
        Self::Send,
        Self::Return,
    ];
}

/// Seeded random failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureModel {
    /// Seed for deterministic randomness
    pub seed: u64,
    /// Probability of failure at each operation
    pub probability: f64,
    /// Points the model applies to, all when empty
    pub points: Vec<FailurePoint>,
}

impl FailureModel {
    /// Create a model failing any operation with `probability`
    #[must_use]
    pub fn new(seed: u64, probability: f64) -> Self {
        Self {
            seed,
            probability: probability.clamp(0.0, 1.0),
            points: Vec::new(),
        }
    }

    /// Restrict the model to some points
    #[must_use]
    pub fn with_points(mut self, points: Vec<FailurePoint>) -> Self {
        self.points = points;
        self
    }

    fn applies_to(&self, point: FailurePoint) -> bool {
        self.points.is_empty() || self.points.contains(&point)
    }
}

#[derive(Debug, Default)]
struct PlanState {
    scripted: HashMap<FailurePoint, usize>,
    random: Option<(FailureModel, ChaCha8Rng)>,
    injected: usize,
}

/// Shared decision maker for simulated failures
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    state: Arc<Mutex<PlanState>>,
}

impl FailurePlan {
    /// A plan that never fails
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A plan drawing failures from `model`
    #[must_use]
    pub fn random(model: FailureModel) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(model.seed);
        let plan = Self::default();
        plan.lock().random = Some((model, rng));
        plan
    }

    /// Fail the next operation at `point`
    #[must_use]
    pub fn fail_on(self, point: FailurePoint) -> Self {
        self.fail_times(point, 1)
    }

    /// Fail the next `times` operations at `point`
    #[must_use]
    pub fn fail_times(self, point: FailurePoint, times: usize) -> Self {
        *self.lock().scripted.entry(point).or_insert(0) += times;
        self
    }

    /// Decide whether the operation at `point` fails now
    ///
    /// # Errors
    ///
    /// Returns the failure text when a failure is injected
    pub fn check(&self, point: FailurePoint) -> Result<(), String> {
        let mut state = self.lock();
        let scripted = match state.scripted.get_mut(&point) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        let random = !scripted
            && match &mut state.random {
                Some((model, rng)) if model.applies_to(point) => {
                    rng.r#gen::<f64>() < model.probability
                }
                _ => false,
            };
        if scripted || random {
            state.injected += 1;
            tracing::debug!(?point, "injecting simulated failure");
            return Err(format!("simulated {point:?} failure"));
        }
        Ok(())
    }

    /// Number of failures injected so far
    #[must_use]
    pub fn injected(&self) -> usize {
        self.lock().injected
    }

    fn lock(&self) -> MutexGuard<'_, PlanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
