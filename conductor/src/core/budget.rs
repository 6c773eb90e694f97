//! Context-window budget rule for worker sessions.

/// Products this close to an integer are treated as that integer.
const EPSILON: f64 = 1e-9;

/// Token count at which a session is considered over budget:
/// `ceil(context_window * threshold)`.
pub fn budget_limit(context_window: u64, threshold: f64) -> u64 {
    let product = context_window as f64 * threshold;
    let rounded = product.round();
    if (product - rounded).abs() < EPSILON {
        return rounded.max(0.0) as u64;
    }
    product.ceil().max(0.0) as u64
}

/// True when `tokens` has reached the budget limit.
pub fn is_over_budget(tokens: u64, context_window: u64, threshold: f64) -> bool {
    tokens >= budget_limit(context_window, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_absorbs_float_noise() {
        assert_eq!(budget_limit(128_000, 0.7), 89_600);
        // 100 * 0.07 is 7.000000000000001 in binary floating point.
        assert_eq!(budget_limit(100, 0.07), 7);
        assert_eq!(budget_limit(400_000, 0.7), 280_000);
    }

    #[test]
    fn limit_rounds_fractional_products_up() {
        assert_eq!(budget_limit(10, 0.55), 6);
        assert_eq!(budget_limit(3, 0.5), 2);
    }

    #[test]
    fn boundary_is_inclusive() {
        assert!(is_over_budget(89_600, 128_000, 0.7));
        assert!(!is_over_budget(89_599, 128_000, 0.7));
        assert!(is_over_budget(1_000, 1_000, 1.0));
        assert!(!is_over_budget(999, 1_000, 1.0));
    }
}
