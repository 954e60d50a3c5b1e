/*!
Adaptive proposal machinery: the capability the sampler refits as the
ensemble moves, plus a stock kernel-density implementation.

A proposal is fitted from a snapshot of walker positions by a
[`ProposalBuilder`]. Once fitted it acts as an independence proposal: the
sampler scores arbitrary positions against it (through the
[`LogDensity`](crate::distributions::LogDensity) supertrait) and draws
i.i.d. candidate batches from it. Builders may be handed a
[`rayon::ThreadPool`] to run their fitting work on; the stock builder also
parallelizes batch evaluation across query points with rayon.

# Examples

```rust
use ensemble_mcmc::distributions::LogDensity;
use ensemble_mcmc::proposal::{KdeBuilder, Proposal, ProposalBuilder};
use ndarray::arr2;
use rand::{rngs::SmallRng, SeedableRng};

let ensemble = arr2(&[[0.0f64], [0.4], [1.1], [1.6]]);
let kde = KdeBuilder.build(ensemble.view(), None).unwrap();

let mut rng = SmallRng::seed_from_u64(7);
let candidates = kde.draw(&mut rng, 8);
assert_eq!(candidates.dim(), (8, 1));

let lnq = kde.log_prob_batch(candidates.view());
assert!(lnq.iter().all(|x| x.is_finite()));
```
*/

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use num_traits::Float;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;

use crate::distributions::LogDensity;
use crate::error::SamplerError;

/// An independence proposal: a log-density that candidates can also be drawn
/// from.
///
/// Draws are i.i.d. samples from the fitted distribution and do not depend on
/// any walker's current position, which is what distinguishes this from a
/// random-walk proposal.
pub trait Proposal<T>: LogDensity<T> {
    /// Draws `count` i.i.d. samples, one per row of the returned array.
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, count: usize) -> Array2<T>;
}

/// Fits a fresh [`Proposal`] from a snapshot of ensemble positions.
///
/// Fitting may be arbitrarily expensive, which is why the sampler refits on
/// an interval instead of every step. When a pool is supplied the fit should
/// run inside it; the sampler passes its pool through without inspecting it.
pub trait ProposalBuilder<T> {
    /// The proposal type this builder produces.
    type Proposal: Proposal<T>;

    /// Fits a proposal to `ensemble`, an `(nwalkers, ndim)` snapshot.
    fn build(
        &self,
        ensemble: ArrayView2<T>,
        pool: Option<&rayon::ThreadPool>,
    ) -> Result<Self::Proposal, SamplerError>;
}

/**
A Gaussian kernel density estimate fitted to an ensemble snapshot.

Every ensemble point carries a Gaussian kernel with a diagonal bandwidth
chosen by Scott's rule, `h_j = sigma_j * n^(-1/(d+4))` with `sigma_j` the
sample standard deviation along dimension `j`. Evaluation computes the
log-density of the resulting mixture with a log-sum-exp over kernels;
drawing picks a kernel uniformly and adds bandwidth-scaled normal noise.

Construct instances through [`KdeBuilder`].
*/
#[derive(Clone, Debug)]
pub struct KdeProposal<T> {
    points: Array2<T>,
    bandwidth: Array1<T>,
    lognorm: T,
}

impl<T: Float> KdeProposal<T> {
    fn fit(ensemble: ArrayView2<T>) -> Result<Self, SamplerError> {
        let (n, dim) = ensemble.dim();
        if n < 2 {
            return Err(SamplerError::EnsembleTooSmall { len: n });
        }

        let n_t = T::from(n).unwrap();
        let scott = n_t.powf(-T::one() / T::from(dim + 4).unwrap());

        let mut bandwidth = Array1::zeros(dim);
        for (j, column) in ensemble.columns().into_iter().enumerate() {
            let mean = column.sum() / n_t;
            let ss = column.fold(T::zero(), |acc, &x| {
                let dx = x - mean;
                acc + dx * dx
            });
            let sigma = (ss / (n_t - T::one())).sqrt();
            let h = sigma * scott;
            if !(h.is_finite() && h > T::zero()) {
                return Err(SamplerError::DegenerateEnsemble { dim: j });
            }
            bandwidth[j] = h;
        }

        // ln(n) + (d/2) ln(2 pi) + sum_j ln(h_j), shared by every query.
        let half = T::from(0.5).unwrap();
        let two_pi = T::from(2.0 * std::f64::consts::PI).unwrap();
        let mut lognorm = n_t.ln() + half * T::from(dim).unwrap() * two_pi.ln();
        for h in bandwidth.iter() {
            lognorm = lognorm + h.ln();
        }

        Ok(Self {
            points: ensemble.to_owned(),
            bandwidth,
            lognorm,
        })
    }

    /// Per-dimension kernel bandwidths.
    pub fn bandwidth(&self) -> ArrayView1<T> {
        self.bandwidth.view()
    }

    fn log_prob_point(&self, x: ArrayView1<T>) -> T {
        let half = T::from(0.5).unwrap();
        let mut exponents = Vec::with_capacity(self.points.nrows());
        for point in self.points.outer_iter() {
            let mut sq = T::zero();
            for ((xj, pj), h) in x.iter().zip(point.iter()).zip(self.bandwidth.iter()) {
                let z = (*xj - *pj) / *h;
                sq = sq + z * z;
            }
            exponents.push(-half * sq);
        }

        let max = exponents.iter().cloned().fold(T::neg_infinity(), T::max);
        if max == T::neg_infinity() {
            // Every kernel underflowed, the query is infinitely far away.
            return T::neg_infinity();
        }
        let mut sum = T::zero();
        for e in exponents {
            sum = sum + (e - max).exp();
        }
        max + sum.ln() - self.lognorm
    }
}

impl<T> LogDensity<T> for KdeProposal<T>
where
    T: Float + Send + Sync,
{
    fn log_prob_batch(&self, positions: ArrayView2<T>) -> Array1<T> {
        let lp: Vec<T> = (0..positions.nrows())
            .into_par_iter()
            .map(|i| self.log_prob_point(positions.row(i)))
            .collect();
        Array1::from_vec(lp)
    }
}

impl<T> Proposal<T> for KdeProposal<T>
where
    T: Float + Send + Sync,
    StandardNormal: Distribution<T>,
{
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, count: usize) -> Array2<T> {
        let (n, dim) = self.points.dim();
        let mut out = Array2::zeros((count, dim));
        for mut row in out.outer_iter_mut() {
            // One kernel index, then one normal per dimension.
            let k = rng.gen_range(0..n);
            for (j, x) in row.iter_mut().enumerate() {
                let eps: T = rng.sample(StandardNormal);
                *x = self.points[[k, j]] + self.bandwidth[j] * eps;
            }
        }
        out
    }
}

/// Stock builder producing [`KdeProposal`]s.
///
/// When a pool is supplied the fit runs inside it via
/// [`rayon::ThreadPool::install`].
#[derive(Clone, Copy, Debug, Default)]
pub struct KdeBuilder;

impl<T> ProposalBuilder<T> for KdeBuilder
where
    T: Float + Send + Sync,
    StandardNormal: Distribution<T>,
{
    type Proposal = KdeProposal<T>;

    fn build(
        &self,
        ensemble: ArrayView2<T>,
        pool: Option<&rayon::ThreadPool>,
    ) -> Result<Self::Proposal, SamplerError> {
        match pool {
            Some(pool) => pool.install(|| KdeProposal::fit(ensemble)),
            None => KdeProposal::fit(ensemble),
        }
    }
}
