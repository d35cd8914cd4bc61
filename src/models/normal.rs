use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Standard normal CDF.
///
/// statrs evaluates the lower tail through erfc, which is accurate in relative
/// terms for negative arguments. The upper half is taken as the reflection
/// 1 - Phi(-x), so Phi(x) + Phi(-x) == 1 up to a single rounding.
#[inline]
pub fn cdf(x: f64) -> f64 {
    let n = Normal::standard();
    if x >= 0.0 {
        1.0 - n.cdf(-x)
    } else {
        n.cdf(x)
    }
}

/// Standard normal density.
#[inline]
pub fn pdf(x: f64) -> f64 {
    Normal::standard().pdf(x)
}
