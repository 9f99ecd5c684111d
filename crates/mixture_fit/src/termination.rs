//! Per-level stopping rules for the E/M loop.

/// Decides after every E-step whether the current level is done.
///
/// The driver calls [`reset`](TerminationCriterion::reset) at the start of each
/// level. `iteration` is 1-based; `losses` holds the mean negative
/// log-likelihood of every active parent.
pub trait TerminationCriterion: Send {
    fn reset(&mut self);
    fn may_stop(&mut self, iteration: usize, losses: &[f64]) -> bool;
}

/// Stops after a fixed number of E-steps.
#[derive(Debug, Clone)]
pub struct MaxIterations {
    iterations: usize,
}

impl MaxIterations {
    pub fn new(iterations: usize) -> Self {
        Self { iterations }
    }
}

impl TerminationCriterion for MaxIterations {
    fn reset(&mut self) {}

    fn may_stop(&mut self, iteration: usize, _losses: &[f64]) -> bool {
        iteration >= self.iterations
    }
}

/// Stops once every parent's loss changed by less than `threshold` relative to
/// the previous iteration, or when `max_iterations` is reached.
#[derive(Debug, Clone)]
pub struct RelativeChange {
    threshold: f64,
    max_iterations: usize,
    previous: Option<Vec<f64>>,
}

impl RelativeChange {
    pub fn new(threshold: f64, max_iterations: usize) -> Self {
        Self {
            threshold,
            max_iterations,
            previous: None,
        }
    }
}

impl TerminationCriterion for RelativeChange {
    fn reset(&mut self) {
        self.previous = None;
    }

    fn may_stop(&mut self, iteration: usize, losses: &[f64]) -> bool {
        if iteration >= self.max_iterations {
            return true;
        }
        let converged = match &self.previous {
            Some(previous) if previous.len() == losses.len() => {
                previous.iter().zip(losses).all(|(prev, cur)| {
                    let change = (cur - prev).abs() / prev.abs().max(f64::MIN_POSITIVE);
                    change < self.threshold
                })
            }
            _ => false,
        };
        self.previous = Some(losses.to_vec());
        converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_iterations_counts_e_steps() {
        let mut criterion = MaxIterations::new(3);
        assert!(!criterion.may_stop(1, &[1.0]));
        assert!(!criterion.may_stop(2, &[1.0]));
        assert!(criterion.may_stop(3, &[1.0]));
    }

    #[test]
    fn relative_change_waits_for_every_parent() {
        let mut criterion = RelativeChange::new(1e-3, 100);
        assert!(!criterion.may_stop(1, &[10.0, 5.0]));
        assert!(!criterion.may_stop(2, &[9.0, 5.0]));
        assert!(!criterion.may_stop(3, &[8.9999, 4.0]));
        assert!(criterion.may_stop(4, &[8.9999, 4.0001]));
    }

    #[test]
    fn relative_change_respects_its_cap_and_resets() {
        let mut criterion = RelativeChange::new(0.0, 2);
        assert!(!criterion.may_stop(1, &[1.0]));
        assert!(criterion.may_stop(2, &[0.5]));
        criterion.reset();
        assert!(!criterion.may_stop(1, &[0.5]));
    }
}
