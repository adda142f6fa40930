//! The Online Weight Tuner: Thompson sampling over a fixed set of weight
//! arms for the composite ranking formula (§4.4).
//!
//! Each arm is a `(w_rec, w_freq, w_tag)` triple; the tuner keeps a
//! `Beta(alpha, beta)` posterior per arm in the Ranking Store and selects
//! arms by sampling from each posterior and picking the max, the standard
//! Thompson-sampling policy. There is no teacher analog for this subsystem
//! (DESIGN.md Open Question #2) — `rand_distr::Beta` is used directly.

use rand::Rng;
use rand_distr::{Beta, Distribution};

use crate::error::{IntentError, IntentResult};
use crate::store::RankingStore;
use crate::types::ArmWeights;

/// The 8 fixed weight arms (§4.4 arm set table).
pub const ARMS: [ArmWeights; 8] = [
    ArmWeights { w_rec: 0.50, w_freq: 0.30, w_tag: 0.20 }, // recency-heavy
    ArmWeights { w_rec: 0.40, w_freq: 0.40, w_tag: 0.20 }, // balanced-rf
    ArmWeights { w_rec: 0.40, w_freq: 0.30, w_tag: 0.30 }, // default
    ArmWeights { w_rec: 0.30, w_freq: 0.40, w_tag: 0.30 }, // frequency-heavy
    ArmWeights { w_rec: 0.30, w_freq: 0.30, w_tag: 0.40 }, // tag-heavy
    ArmWeights { w_rec: 0.20, w_freq: 0.40, w_tag: 0.40 }, // low-recency
    ArmWeights { w_rec: 0.50, w_freq: 0.20, w_tag: 0.30 }, // high-rec-low-freq
    ArmWeights { w_rec: 0.33, w_freq: 0.33, w_tag: 0.34 }, // equal
];

/// Stable names for each arm, matching the §4.4 arm set table.
pub const ARM_NAMES: [&str; 8] = [
    "recency-heavy",
    "balanced-rf",
    "default",
    "frequency-heavy",
    "tag-heavy",
    "low-recency",
    "high-rec-low-freq",
    "equal",
];

/// Number of fixed arms the tuner maintains.
pub const ARM_COUNT: usize = ARMS.len();

/// The Online Weight Tuner for one project.
pub struct Tuner<'a> {
    store: &'a RankingStore,
    project: String,
    param_cap: f64,
}

impl<'a> Tuner<'a> {
    /// Construct a tuner bound to `project`'s arm state in `store`.
    pub fn new(store: &'a RankingStore, project: impl Into<String>, param_cap: f64) -> Self {
        Self {
            store,
            project: project.into(),
            param_cap,
        }
    }

    /// `select_arm()`: sample each arm's `Beta(alpha, beta)` posterior and
    /// return the index and weights of the arm with the highest sample
    /// (§4.4 "Arm selection").
    pub fn select_arm(&self) -> IntentResult<(usize, ArmWeights)> {
        let state = self.store.arm_state(&self.project, ARM_COUNT)?;
        let mut rng = rand::thread_rng();
        let mut best_idx = 0;
        let mut best_sample = f64::MIN;
        for (idx, (alpha, beta)) in state.iter().enumerate() {
            let sample = self.sample_beta(&mut rng, *alpha, *beta)?;
            if sample > best_sample {
                best_sample = sample;
                best_idx = idx;
            }
        }
        Ok((best_idx, ARMS[best_idx]))
    }

    fn sample_beta(&self, rng: &mut impl Rng, alpha: f64, beta: f64) -> IntentResult<f64> {
        // A corrupt or non-positive posterior resets to the uninformative
        // prior rather than panicking the caller (§4.4 "corrupt arm state").
        let dist = match Beta::new(alpha.max(1e-6), beta.max(1e-6)) {
            Ok(dist) => dist,
            Err(_) => Beta::new(1.0, 1.0).map_err(|e| IntentError::Internal(e.to_string()))?,
        };
        Ok(dist.sample(rng))
    }

    /// `update_arm(k, hit)`: record the observed outcome against arm `k`'s
    /// posterior (§4.4 "Feedback").
    pub fn update_arm(&self, arm: usize, hit: bool) -> IntentResult<()> {
        if arm >= ARM_COUNT {
            return Err(IntentError::BadRequest(format!("unknown tuner arm {arm}")));
        }
        self.store.update_arm(&self.project, arm, hit, self.param_cap)
    }

    /// `best_arm()`: the arm with the highest posterior mean
    /// `alpha / (alpha + beta)`, used for introspection (not selection).
    pub fn best_arm(&self) -> IntentResult<(usize, ArmWeights, f64)> {
        let state = self.store.arm_state(&self.project, ARM_COUNT)?;
        let (idx, (alpha, beta)) = state
            .iter()
            .enumerate()
            .max_by(|a, b| {
                let mean_a = a.1 .0 / (a.1 .0 + a.1 .1);
                let mean_b = b.1 .0 / (b.1 .0 + b.1 .1);
                mean_a.partial_cmp(&mean_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("ARM_COUNT is a nonzero constant");
        let mean = alpha / (alpha + beta);
        Ok((idx, ARMS[idx], mean))
    }

    /// `reset_arms()`: reset every arm back to `Beta(1,1)` (§4.4
    /// "Operator reset").
    pub fn reset_arms(&self) -> IntentResult<()> {
        self.store.reset_arms(&self.project, ARM_COUNT)
    }

    /// The full arm table with posterior means, for `/tuner/stats`.
    pub fn stats(&self) -> IntentResult<Vec<ArmStat>> {
        let state = self.store.arm_state(&self.project, ARM_COUNT)?;
        Ok(state
            .into_iter()
            .enumerate()
            .map(|(idx, (alpha, beta))| ArmStat {
                arm: idx,
                name: ARM_NAMES[idx],
                weights: ARMS[idx],
                alpha,
                beta,
                mean: alpha / (alpha + beta),
            })
            .collect())
    }
}

/// Introspection row for one arm (§6 `/tuner/stats`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ArmStat {
    /// Arm index.
    pub arm: usize,
    /// Stable name from the §4.4 arm set table.
    pub name: &'static str,
    /// The weight triple this arm applies.
    pub weights: ArmWeights,
    /// Current posterior alpha.
    pub alpha: f64,
    /// Current posterior beta.
    pub beta: f64,
    /// Posterior mean `alpha / (alpha + beta)`.
    pub mean: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Normalization;

    fn store() -> RankingStore {
        RankingStore::open_in_memory(Normalization::default()).unwrap()
    }

    #[test]
    fn select_arm_returns_valid_index() {
        let store = store();
        let tuner = Tuner::new(&store, "p", 1_000_000.0);
        let (idx, weights) = tuner.select_arm().unwrap();
        assert!(idx < ARM_COUNT);
        assert_eq!(weights.w_rec, ARMS[idx].w_rec);
    }

    #[test]
    fn heavily_rewarded_arm_becomes_best() {
        let store = store();
        let tuner = Tuner::new(&store, "p", 1_000_000.0);
        for _ in 0..50 {
            tuner.update_arm(3, true).unwrap();
        }
        let (idx, _, mean) = tuner.best_arm().unwrap();
        assert_eq!(idx, 3);
        assert!(mean > 0.9);
    }

    #[test]
    fn reset_arms_restores_uniform_prior() {
        let store = store();
        let tuner = Tuner::new(&store, "p", 1_000_000.0);
        tuner.update_arm(1, true).unwrap();
        tuner.reset_arms().unwrap();
        let stats = tuner.stats().unwrap();
        for s in stats {
            assert_eq!((s.alpha, s.beta), (1.0, 1.0));
        }
    }

    #[test]
    fn update_arm_rejects_out_of_range_index() {
        let store = store();
        let tuner = Tuner::new(&store, "p", 1_000_000.0);
        assert!(tuner.update_arm(99, true).is_err());
    }
}
