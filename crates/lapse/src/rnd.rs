// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{fmt::Debug, time::Duration};

/// Fraction by which an expiry may deviate from its base duration in either direction.
pub(crate) const EXPIRY_DEVIATION: f64 = 0.05;

/// Non-cryptographic random source for expiry jitter.
///
/// Spreading expiries keeps entries written together from expiring together, which would
/// otherwise send a burst of reloads to the backing store.
#[derive(Clone, Default)]
pub(crate) enum Rnd {
    #[default]
    Real,

    #[cfg(test)]
    Test(std::sync::Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for Rnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "Real"),
            #[cfg(test)]
            Self::Test(_) => write!(f, "Test"),
        }
    }
}

impl Rnd {
    #[cfg(test)]
    pub fn new_fixed(value: f64) -> Self {
        Self::Test(std::sync::Arc::new(move || value))
    }

    /// Uniform sample in `[0, 1)`.
    pub fn next_f64(&self) -> f64 {
        match self {
            Self::Real => fastrand::f64(),
            #[cfg(test)]
            Self::Test(generator) => generator(),
        }
    }

    /// Scales `base` by a random factor in `(1 - EXPIRY_DEVIATION, 1 + EXPIRY_DEVIATION]`,
    /// saturating at [`Duration::MAX`].
    pub fn around(&self, base: Duration) -> Duration {
        let factor = 1.0 + EXPIRY_DEVIATION - 2.0 * EXPIRY_DEVIATION * self.next_f64();
        Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::lowest_sample(0.0, Duration::from_millis(105_000))]
    #[case::middle_sample(0.5, Duration::from_secs(100))]
    #[case::highest_sample(0.999_999, Duration::from_millis(95_000))]
    fn around_stays_within_deviation(#[case] sample: f64, #[case] expected: Duration) {
        let jittered = Rnd::new_fixed(sample).around(Duration::from_secs(100));
        let error = jittered.abs_diff(expected);
        assert!(error < Duration::from_millis(1), "{jittered:?} vs {expected:?}");
    }

    #[rstest]
    #[case::stretched(0.0)]
    #[case::unchanged(0.5)]
    fn huge_base_saturates(#[case] sample: f64) {
        assert_eq!(Rnd::new_fixed(sample).around(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn huge_base_can_still_shrink() {
        let jittered = Rnd::new_fixed(0.999_999).around(Duration::MAX);
        assert!(jittered < Duration::MAX);
        assert!(jittered > Duration::MAX / 2);
    }

    #[test]
    fn real_samples_are_bounded() {
        let rnd = Rnd::default();
        let base = Duration::from_secs(60);
        for _ in 0..1_000 {
            let jittered = rnd.around(base);
            assert!(jittered > base.mul_f64(1.0 - EXPIRY_DEVIATION));
            assert!(jittered <= base.mul_f64(1.0 + EXPIRY_DEVIATION));
        }
    }

    #[test]
    fn debug_names_the_source() {
        assert_eq!(format!("{:?}", Rnd::Real), "Real");
        assert_eq!(format!("{:?}", Rnd::new_fixed(0.5)), "Test");
    }
}
