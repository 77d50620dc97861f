use std::time::Duration;

use rand::Rng;

/// Default exponential back-off schedule: 200ms -> 400ms -> 800ms -> 1600ms,
/// jittered by +/-20%.
pub fn backoff(attempt: u64) -> Duration {
    let base_delay_ms = 200u64 * (1u64 << attempt.saturating_sub(1).min(16));
    let jitter = rand::rng().random_range(0.8..1.2);
    let delay_ms = (base_delay_ms as f64 * jitter) as u64;
    Duration::from_millis(delay_ms)
}

/// Character-count token estimate: `ceil(chars / 4)`. Deliberately not an
/// exact tokenizer count -- cheap and stable across models.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn backoff_grows_with_attempt() {
        let first = backoff(1).as_millis();
        let third = backoff(3).as_millis();
        assert!(third > first);
    }
}
