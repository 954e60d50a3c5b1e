/*!
Batched log-density evaluators: the seam through which priors and
likelihoods are handed to the sampler, plus a couple of stock targets.

Evaluators work on whole ensembles at once: they take an `(n, dim)` view of
positions and return the `n` natural-log densities in one call. The module is
generic over the floating-point precision (e.g., `f32` or `f64`) via the
[`num_traits::Float`] trait.

# Examples

```rust
use ensemble_mcmc::distributions::{IsotropicGaussian, LogDensity, LogDensityFn};
use ndarray::{arr1, arr2, Array1, ArrayView2};

// A normalized Gaussian prior centered at the origin.
let prior = IsotropicGaussian::new(arr1(&[0.0, 0.0]), 1.0);
let positions = arr2(&[[0.5, -0.5], [0.0, 0.0]]);
let lp = prior.log_prob_batch(positions.view());
assert_eq!(lp.len(), 2);

// Any closure over a batch of positions works through the adapter.
let flat = LogDensityFn(|p: ArrayView2<f64>| Array1::zeros(p.nrows()));
assert_eq!(flat.log_prob_batch(positions.view())[0], 0.0);
```
*/

use ndarray::{Array1, ArrayView2};
use num_traits::Float;
use std::f64::consts::PI;

/// A batched natural-log density over positions in parameter space.
///
/// Implementations must accept an `(n, dim)` view and return an array of
/// length `n`; the sampler relies on this whole-ensemble contract and never
/// evaluates positions one at a time.
pub trait LogDensity<T> {
    /// Evaluates the log-density at every row of `positions`.
    fn log_prob_batch(&self, positions: ArrayView2<T>) -> Array1<T>;
}

/**
Adapter that turns a plain closure into a [`LogDensity`].

Useful when the target is a one-off expression rather than a reusable
distribution type.

# Examples

```rust
use ensemble_mcmc::distributions::{LogDensity, LogDensityFn};
use ndarray::{arr2, Array1, ArrayView2};

// log p(x) = -|x|^2 / 2, unnormalized.
let target = LogDensityFn(|p: ArrayView2<f64>| {
    p.outer_iter()
        .map(|row| -0.5 * row.iter().map(|x| x * x).sum::<f64>())
        .collect()
});
let lp = target.log_prob_batch(arr2(&[[1.0, 1.0]]).view());
assert_eq!(lp[0], -1.0);
```
*/
#[derive(Clone)]
pub struct LogDensityFn<F>(pub F);

impl<T, F> LogDensity<T> for LogDensityFn<F>
where
    F: Fn(ArrayView2<T>) -> Array1<T>,
{
    fn log_prob_batch(&self, positions: ArrayView2<T>) -> Array1<T> {
        (self.0)(positions)
    }
}

/**
An isotropic Gaussian with a fully normalized log-density.

Every coordinate shares the same standard deviation `std` around the
per-coordinate `mean`. Generic over the floating-point type `T`.

# Examples

```rust
use ensemble_mcmc::distributions::{IsotropicGaussian, LogDensity};
use ndarray::{arr1, arr2};

let gauss = IsotropicGaussian::new(arr1(&[0.0f64]), 1.0);
let lp = gauss.log_prob_batch(arr2(&[[0.0]]).view());
// Standard normal density at the mode.
assert!((lp[0] - (-0.9189385332046727)).abs() < 1e-12);
```
*/
#[derive(Clone, Debug)]
pub struct IsotropicGaussian<T> {
    /// Center of the distribution, one entry per dimension.
    pub mean: Array1<T>,
    /// Shared standard deviation, must be positive.
    pub std: T,
}

impl<T: Float> IsotropicGaussian<T> {
    /// Creates an isotropic Gaussian with the given mean and standard deviation.
    pub fn new(mean: Array1<T>, std: T) -> Self {
        Self { mean, std }
    }
}

impl<T: Float> LogDensity<T> for IsotropicGaussian<T> {
    fn log_prob_batch(&self, positions: ArrayView2<T>) -> Array1<T> {
        let half = T::from(0.5).unwrap();
        let two_pi = T::from(2.0 * PI).unwrap();
        let d = T::from(self.mean.len()).unwrap();
        let var = self.std * self.std;
        let lognorm = half * d * (two_pi * var).ln();
        positions
            .outer_iter()
            .map(|row| {
                let mut sq = T::zero();
                for (x, m) in row.iter().zip(self.mean.iter()) {
                    let diff = *x - *m;
                    sq = sq + diff * diff;
                }
                -half * sq / var - lognorm
            })
            .collect()
    }
}

/**
A uniform density on an axis-aligned box, negative infinity outside it.

The usual choice for a bounded prior: within `[lower, upper]` the
log-density is the constant `-ln(volume)`, everywhere else it is `-inf`,
which makes the sampler reject any candidate that leaves the box.

# Examples

```rust
use ensemble_mcmc::distributions::{BoxUniform, LogDensity};
use ndarray::{arr1, arr2};

let prior = BoxUniform::new(arr1(&[0.0, 0.0]), arr1(&[1.0, 2.0]));
let lp = prior.log_prob_batch(arr2(&[[0.5, 1.0], [3.0, 1.0]]).view());
assert!((lp[0] - (-2.0f64.ln())).abs() < 1e-12);
assert_eq!(lp[1], f64::NEG_INFINITY);
```
*/
#[derive(Clone, Debug)]
pub struct BoxUniform<T> {
    /// Lower corner of the box, one entry per dimension.
    pub lower: Array1<T>,
    /// Upper corner of the box; every entry must exceed its lower counterpart.
    pub upper: Array1<T>,
}

impl<T: Float> BoxUniform<T> {
    /// Creates a uniform density on the box spanned by `lower` and `upper`.
    pub fn new(lower: Array1<T>, upper: Array1<T>) -> Self {
        Self { lower, upper }
    }
}

impl<T: Float> LogDensity<T> for BoxUniform<T> {
    fn log_prob_batch(&self, positions: ArrayView2<T>) -> Array1<T> {
        let mut lognorm = T::zero();
        for (lo, hi) in self.lower.iter().zip(self.upper.iter()) {
            lognorm = lognorm + (*hi - *lo).ln();
        }
        positions
            .outer_iter()
            .map(|row| {
                let inside = row
                    .iter()
                    .zip(self.lower.iter().zip(self.upper.iter()))
                    .all(|(x, (lo, hi))| *x >= *lo && *x <= *hi);
                if inside {
                    -lognorm
                } else {
                    T::neg_infinity()
                }
            })
            .collect()
    }
}
