//! Running mean/variance accumulation (`SPEC_FULL.md` §3.4,
//! `liberaApp/statistics.cpp`), supplemented as a reusable helper: the
//! original inlines `Σx`/`Σx²` accumulation both in the DSC digest step and
//! in its standalone diagnostic statistics PVs. Welford's online algorithm
//! is used here instead of the naive sum-of-squares so that a long-running
//! accumulation (e.g. over a full waveform) doesn't lose precision to
//! catastrophic cancellation.

/// Online mean/variance accumulator for a stream of `f64` samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn new() -> Self {
        Welford::default()
    }

    pub fn push(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = sample - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance (divide by `n`, not `n - 1`): the DSC digest
    /// step needs the per-position variance of a fixed-size sample, not an
    /// estimate of an underlying population.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Standard deviation relative to `reference`, the ratio the DSC digest
    /// step (`spec.md` §4.3 step 5) compares against `max_deviation`.
    /// Returns `f64::INFINITY` if `reference` is zero and the accumulator
    /// has any spread, `0.0` if both are zero.
    pub fn relative_deviation(&self, reference: f64) -> f64 {
        if reference == 0.0 {
            if self.std_dev() == 0.0 {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            self.std_dev() / reference.abs()
        }
    }

    pub fn merge(&mut self, other: &Welford) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * (other.count as f64 / total as f64);
        let m2 = self.m2
            + other.m2
            + delta * delta * (self.count as f64 * other.count as f64 / total as f64);
        self.count = total;
        self.mean = mean;
        self.m2 = m2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_mean_variance(samples: &[f64]) -> (f64, f64) {
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        (mean, variance)
    }

    #[test]
    fn matches_naive_mean_and_variance() {
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut w = Welford::new();
        for &s in &samples {
            w.push(s);
        }
        let (mean, variance) = naive_mean_variance(&samples);
        assert!((w.mean() - mean).abs() < 1e-9);
        assert!((w.variance() - variance).abs() < 1e-9);
        assert_eq!(w.count(), samples.len() as u64);
    }

    #[test]
    fn empty_accumulator_has_zero_variance() {
        let w = Welford::new();
        assert_eq!(w.count(), 0);
        assert_eq!(w.variance(), 0.0);
        assert_eq!(w.relative_deviation(1.0), 0.0);
    }

    #[test]
    fn constant_samples_have_zero_variance() {
        let mut w = Welford::new();
        for _ in 0..10 {
            w.push(3.5);
        }
        assert_eq!(w.variance(), 0.0);
        assert_eq!(w.relative_deviation(3.5), 0.0);
    }

    #[test]
    fn relative_deviation_against_zero_reference_with_spread_is_infinite() {
        let mut w = Welford::new();
        w.push(-1.0);
        w.push(1.0);
        assert!(w.relative_deviation(0.0).is_infinite());
    }

    #[test]
    fn merge_matches_single_pass_accumulation() {
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let mut whole = Welford::new();
        for &s in &samples {
            whole.push(s);
        }

        let mut left = Welford::new();
        for &s in &samples[..3] {
            left.push(s);
        }
        let mut right = Welford::new();
        for &s in &samples[3..] {
            right.push(s);
        }
        left.merge(&right);

        assert!((left.mean() - whole.mean()).abs() < 1e-9);
        assert!((left.variance() - whole.variance()).abs() < 1e-9);
        assert_eq!(left.count(), whole.count());
    }
}
