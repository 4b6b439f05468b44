//! Convergence decision for the self-consistency loop.

use crate::domain::models::{ConvergenceConfig, HubbardParameterSet, LoopDecision};

/// Result of comparing one iteration's input and output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCheck {
    pub max_delta: f64,
    pub decision: LoopDecision,
}

/// Strictly below the tolerance. A delta equal to the tolerance is not converged.
pub fn is_converged(max_delta: f64, tolerance: f64) -> bool {
    max_delta < tolerance
}

/// Decide what follows iteration `iteration` (0-based within its cycle).
///
/// The counter is incremented after every unconverged iteration; reaching
/// `max_iterations` ends the cycle without convergence.
pub fn decide(
    input: &HubbardParameterSet,
    output: &HubbardParameterSet,
    iteration: u32,
    config: &ConvergenceConfig,
) -> ConvergenceCheck {
    let max_delta = input.max_abs_delta(output);
    let decision = if is_converged(max_delta, config.tolerance) {
        LoopDecision::Converged
    } else if iteration + 1 >= config.max_iterations {
        LoopDecision::MaxIterationsExceeded
    } else {
        LoopDecision::Continue
    };
    ConvergenceCheck {
        max_delta,
        decision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::HubbardKey;

    fn set(values: &[f64]) -> HubbardParameterSet {
        HubbardParameterSet::from_entries(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (HubbardKey::on_site(i, "3d"), *v)),
        )
        .unwrap()
    }

    fn config(tolerance: f64, max_iterations: u32) -> ConvergenceConfig {
        ConvergenceConfig {
            tolerance,
            max_iterations,
        }
    }

    #[test]
    fn test_delta_equal_to_tolerance_is_not_converged() {
        // 0.5 and 0.25 are exact in binary, so the delta is exactly 0.25.
        let check = decide(&set(&[1.0, 0.5]), &set(&[1.0, 0.75]), 0, &config(0.25, 10));
        assert_eq!(check.max_delta, 0.25);
        assert_eq!(check.decision, LoopDecision::Continue);
    }

    #[test]
    fn test_delta_below_tolerance_converges() {
        let check = decide(&set(&[1.0, 0.5]), &set(&[1.0, 0.625]), 0, &config(0.25, 10));
        assert_eq!(check.decision, LoopDecision::Converged);
    }

    #[test]
    fn test_max_iterations_reached() {
        let c = config(0.01, 3);
        assert_eq!(decide(&set(&[0.0]), &set(&[1.0]), 1, &c).decision, LoopDecision::Continue);
        assert_eq!(
            decide(&set(&[0.0]), &set(&[1.0]), 2, &c).decision,
            LoopDecision::MaxIterationsExceeded
        );
    }

    #[test]
    fn test_convergence_wins_on_last_iteration() {
        let check = decide(&set(&[1.0]), &set(&[1.0]), 2, &config(0.01, 3));
        assert_eq!(check.decision, LoopDecision::Converged);
    }

    #[test]
    fn test_two_site_example() {
        let check = decide(&set(&[2.0, 2.0]), &set(&[2.05, 1.98]), 1, &config(0.1, 10));
        assert!((check.max_delta - 0.05).abs() < 1e-12);
        assert_eq!(check.decision, LoopDecision::Converged);
    }
}
