/*!
# Ensemble Sampler

This module implements an ensemble MCMC sampler that drives a whole population
of walkers with a shared, adaptive *independence* proposal. Candidates are
drawn i.i.d. from a density estimate fitted to the ensemble itself (see
[`ProposalBuilder`]), so the Metropolis-Hastings ratio carries an extra
importance-weight term for the proposal density on top of the usual posterior
ratio. The proposal is refit on a configurable cadence as the ensemble moves.

## Overview

- **Target**: supplied as two batched evaluators, a log-prior and a
  log-likelihood, both implementing [`LogDensity`].
- **Proposal**: any [`ProposalBuilder`]; the sampler owns the fitted
  [`Proposal`](crate::proposal::Proposal) and replaces it wholesale at every
  refit. An optional [`rayon::ThreadPool`] is forwarded to the builder.
- **History**: positions, summed log-posterior, proposal log-density, and
  acceptance flags for every completed step, growing across [`run`] calls and
  readable at any time between them.
- **Reproducibility**: one [`SmallRng`] drives candidate draws and acceptance
  uniforms; `set_seed` makes runs repeatable.

## Example Usage

```rust
use ensemble_mcmc::distributions::IsotropicGaussian;
use ensemble_mcmc::ensemble::EnsembleSampler;
use ensemble_mcmc::proposal::KdeBuilder;
use ndarray::{arr1, Array2};
use rand::{rngs::SmallRng, Rng, SeedableRng};

// Gaussian prior times Gaussian likelihood in two dimensions.
let prior = IsotropicGaussian::new(arr1(&[0.0, 0.0]), 2.0);
let like = IsotropicGaussian::new(arr1(&[1.0, -1.0]), 1.0);

let mut sampler = EnsembleSampler::new(8, 2, prior, like, KdeBuilder)
    .unwrap()
    .set_seed(42);

// Walkers start scattered around the origin.
let mut rng = SmallRng::seed_from_u64(7);
let p0 = Array2::from_shape_fn((8, 2), |_| rng.gen_range(-1.0..1.0));

// 20 steps, refitting the proposal every 5.
let state = sampler.run(p0, 20, 5).unwrap();
assert_eq!(sampler.iterations(), 20);
assert_eq!(state.positions.dim(), (8, 2));

// A further run resumes from the returned state without re-evaluating it.
sampler.run(state, 10, 5).unwrap();
assert_eq!(sampler.chain().dim(), (30, 8, 2));
```

[`run`]: EnsembleSampler::run
[`LogDensity`]: crate::distributions::LogDensity
[`ProposalBuilder`]: crate::proposal::ProposalBuilder
[`SmallRng`]: rand::rngs::SmallRng
*/

use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use num_traits::Float;
use rand::prelude::*;
use std::collections::VecDeque;

use crate::distributions::LogDensity;
use crate::error::SamplerError;
use crate::proposal::{Proposal, ProposalBuilder};

/**
The starting point of a [`EnsembleSampler::run`] call: an `(nwalkers, ndim)`
batch of walker positions, plus optional cached per-walker log-densities.

Cached values are trusted verbatim and skip the corresponding batch
evaluation, which matters when the evaluators are expensive. The
[`EnsembleState`] returned by a run converts back into a `Start` carrying all
three caches, so consecutive runs resume without recomputing anything; a bare
position array converts too, with empty caches.

# Examples

```rust
use ensemble_mcmc::ensemble::Start;
use ndarray::{arr1, arr2};

let start = Start::new(arr2(&[[0.0], [0.5]]))
    .with_lnprior(arr1(&[-0.92, -1.04]))
    .with_lnlike(arr1(&[-2.31, -2.14]));
```
*/
#[derive(Clone, Debug)]
pub struct Start<T> {
    positions: Array2<T>,
    lnprior: Option<Array1<T>>,
    lnlike: Option<Array1<T>>,
    lnprop: Option<Array1<T>>,
}

impl<T> Start<T> {
    /// Creates a start from bare positions, with no cached log-densities.
    pub fn new(positions: Array2<T>) -> Self {
        Self {
            positions,
            lnprior: None,
            lnlike: None,
            lnprop: None,
        }
    }

    /// Supplies cached log-prior values, one per walker, trusted verbatim.
    pub fn with_lnprior(mut self, lnprior: Array1<T>) -> Self {
        self.lnprior = Some(lnprior);
        self
    }

    /// Supplies cached log-likelihood values, one per walker, trusted verbatim.
    pub fn with_lnlike(mut self, lnlike: Array1<T>) -> Self {
        self.lnlike = Some(lnlike);
        self
    }

    /// Supplies cached log-proposal-density values, one per walker, trusted
    /// verbatim.
    pub fn with_lnprop(mut self, lnprop: Array1<T>) -> Self {
        self.lnprop = Some(lnprop);
        self
    }
}

impl<T> From<Array2<T>> for Start<T> {
    fn from(positions: Array2<T>) -> Self {
        Start::new(positions)
    }
}

impl<T> From<EnsembleState<T>> for Start<T> {
    fn from(state: EnsembleState<T>) -> Self {
        Start {
            positions: state.positions,
            lnprior: Some(state.lnprior),
            lnlike: Some(state.lnlike),
            lnprop: Some(state.lnprop),
        }
    }
}

/// The ensemble at the end of a [`EnsembleSampler::run`] call.
///
/// Holds the current position of every walker together with the three
/// log-densities the sampler tracked for it. For walkers whose last proposal
/// was rejected these are the retained values, not the rejected candidate's.
/// Feed the state back into `run` (it converts into a [`Start`]) to continue
/// sampling from exactly here.
#[derive(Clone, Debug, PartialEq)]
pub struct EnsembleState<T> {
    /// Walker positions, shape `(nwalkers, ndim)`.
    pub positions: Array2<T>,
    /// Log-prior of every walker at its current position.
    pub lnprior: Array1<T>,
    /// Log-likelihood of every walker at its current position.
    pub lnlike: Array1<T>,
    /// Log-density of the current proposal at every walker's position.
    pub lnprop: Array1<T>,
}

/**
An ensemble MCMC sampler with an adaptive independence proposal.

The sampler advances `nwalkers` walkers in lockstep. Each step draws a full
batch of candidates from the current proposal, scores prior, likelihood, and
proposal density over the whole batch, and accepts per walker on the log
Metropolis-Hastings ratio

```text
ln_ratio = (lnprior_p + lnlike_p) - (lnprior + lnlike) + lnq - lnq_p
```

where the trailing `lnq - lnq_p` term accounts for the proposal being neither
symmetric nor the target. Accepted walkers take over the candidate position
and all three log-densities at once; rejected walkers are left untouched.
Every `update_interval` steps the proposal is refit to the current ensemble
and the walkers are re-scored under the new fit.

# Type Parameters

- `T`: Floating-point type of the parameter space (e.g. `f32` or `f64`).
- `P`: The log-prior evaluator, a batched [`LogDensity`].
- `L`: The log-likelihood evaluator, a batched [`LogDensity`].
- `B`: The [`ProposalBuilder`] that fits a fresh proposal from an ensemble
  snapshot.

# Reproducibility

A single [`SmallRng`](rand::rngs::SmallRng) drives the whole sampler. Per
step it is consumed by the proposal's draw first and then by one uniform per
walker that was not already accepted on a positive ratio, in walker order.
Two runs repeat each other exactly when they share the seed, the walker
count, the dimension, and the proposal type; changing any of those shifts
the stream.

# Examples

```rust
use ensemble_mcmc::distributions::{BoxUniform, IsotropicGaussian};
use ensemble_mcmc::ensemble::EnsembleSampler;
use ensemble_mcmc::proposal::KdeBuilder;
use ndarray::{arr1, arr2};

// Flat prior on a box, Gaussian likelihood.
let prior = BoxUniform::new(arr1(&[-5.0]), arr1(&[5.0]));
let like = IsotropicGaussian::new(arr1(&[0.5]), 1.0);

let mut sampler = EnsembleSampler::new(4, 1, prior, like, KdeBuilder)
    .unwrap()
    .set_seed(11);

let p0 = arr2(&[[-1.0], [-0.3], [0.4], [1.2]]);
sampler.run(p0, 50, 10).unwrap();

assert_eq!(sampler.iterations(), 50);
assert_eq!(sampler.accepted().dim(), (50, 4));
```
*/
pub struct EnsembleSampler<T, P, L, B>
where
    B: ProposalBuilder<T>,
{
    nwalkers: usize,
    ndim: usize,
    lnprior: P,
    lnlike: L,
    builder: B,
    proposal: Option<B::Proposal>,
    pool: Option<rayon::ThreadPool>,
    rng: SmallRng,
    iterations: usize,
    chain: Array3<T>,
    lnpost: Array2<T>,
    lnprop: Array2<T>,
    accepted: Array2<bool>,
}

impl<T, P, L, B> EnsembleSampler<T, P, L, B>
where
    T: Float,
    P: LogDensity<T>,
    L: LogDensity<T>,
    B: ProposalBuilder<T>,
    rand_distr::Standard: rand_distr::Distribution<T>,
{
    /**
    Creates a sampler for `nwalkers` walkers in an `ndim`-dimensional space.

    Construction is lazy: no evaluator is called and no proposal is fit until
    the first [`run`](Self::run). The iteration counter starts at zero and
    every history array starts empty.

    # Arguments

    * `nwalkers` - Number of walkers in the ensemble, at least one.
    * `ndim` - Dimension of the parameter space, at least one.
    * `lnprior` - Batched log-prior evaluator.
    * `lnlike` - Batched log-likelihood evaluator.
    * `builder` - Fits the adaptive proposal from an ensemble snapshot.

    Returns [`SamplerError::EmptyEnsemble`] if either count is zero.

    # Examples

    ```rust
    use ensemble_mcmc::distributions::IsotropicGaussian;
    use ensemble_mcmc::ensemble::EnsembleSampler;
    use ensemble_mcmc::proposal::KdeBuilder;
    use ndarray::arr1;

    let prior = IsotropicGaussian::new(arr1(&[0.0]), 1.0);
    let like = IsotropicGaussian::new(arr1(&[0.0]), 1.0);
    let sampler = EnsembleSampler::new(16, 1, prior, like, KdeBuilder).unwrap();
    assert_eq!(sampler.iterations(), 0);
    ```
    */
    pub fn new(
        nwalkers: usize,
        ndim: usize,
        lnprior: P,
        lnlike: L,
        builder: B,
    ) -> Result<Self, SamplerError> {
        if nwalkers == 0 || ndim == 0 {
            return Err(SamplerError::EmptyEnsemble { nwalkers, ndim });
        }
        Ok(Self {
            nwalkers,
            ndim,
            lnprior,
            lnlike,
            builder,
            proposal: None,
            pool: None,
            rng: SmallRng::seed_from_u64(thread_rng().gen::<u64>()),
            iterations: 0,
            chain: Array3::zeros((0, nwalkers, ndim)),
            lnpost: Array2::zeros((0, nwalkers)),
            lnprop: Array2::zeros((0, nwalkers)),
            accepted: Array2::from_elem((0, nwalkers), false),
        })
    }

    /// Sets a new random seed, making subsequent runs reproducible.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Attaches a worker pool that is handed to the proposal builder at every
    /// fit. The sampler itself never schedules work on it.
    pub fn with_pool(mut self, pool: rayon::ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /**
    Advances the ensemble by `iterations` steps.

    On the first call this fits the initial proposal from the start positions
    (and the attached pool, if any). Missing log-densities in `start` are
    evaluated over the whole batch in one call each; supplied ones are used
    verbatim. The step history grows by exactly `iterations` slots, appended
    after everything recorded by earlier calls.

    The proposal is refit from the current ensemble whenever the lifetime
    iteration count reaches a multiple of `update_interval`, so back-to-back
    runs continue one cadence instead of each starting its own. After a
    refit, only the proposal density of the walkers is recomputed; prior and
    likelihood stay as they were.

    # Arguments

    * `start` - Walker positions with optional cached log-densities;
      [`Array2<T>`] and [`EnsembleState`] both convert.
    * `iterations` - Number of steps to run, at least one.
    * `update_interval` - Steps between proposal refits, at least one.

    Returns the final [`EnsembleState`], or an error if a precondition fails
    (before any state is touched) or a proposal fit fails (the error
    propagates; completed steps stay recorded and the previous proposal is
    kept).
    */
    pub fn run(
        &mut self,
        start: impl Into<Start<T>>,
        iterations: usize,
        update_interval: usize,
    ) -> Result<EnsembleState<T>, SamplerError> {
        self.advance(start.into(), iterations, update_interval, None)
    }

    /// Like [`run`](Self::run), with a progress bar showing the acceptance
    /// probability over a sliding window of 100 steps.
    pub fn run_progress(
        &mut self,
        start: impl Into<Start<T>>,
        iterations: usize,
        update_interval: usize,
    ) -> Result<EnsembleState<T>, SamplerError> {
        let pb = ProgressBar::new(iterations as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        pb.set_prefix("Ensemble");

        let state = self.advance(start.into(), iterations, update_interval, Some(&pb))?;
        pb.finish_with_message("Done!");
        Ok(state)
    }

    /// The shared step loop behind [`run`](Self::run) and
    /// [`run_progress`](Self::run_progress).
    fn advance(
        &mut self,
        start: Start<T>,
        iterations: usize,
        update_interval: usize,
        progress: Option<&ProgressBar>,
    ) -> Result<EnsembleState<T>, SamplerError> {
        // Every precondition is checked before any sampler state changes.
        let (got_walkers, got_dim) = start.positions.dim();
        if (got_walkers, got_dim) != (self.nwalkers, self.ndim) {
            return Err(SamplerError::PositionShape {
                nwalkers: self.nwalkers,
                ndim: self.ndim,
                got_walkers,
                got_dim,
            });
        }
        if iterations == 0 {
            return Err(SamplerError::NoIterations);
        }
        if update_interval == 0 {
            return Err(SamplerError::ZeroUpdateInterval);
        }
        for (name, cached) in [
            ("lnprior", &start.lnprior),
            ("lnlike", &start.lnlike),
            ("lnprop", &start.lnprop),
        ] {
            if let Some(values) = cached {
                if values.len() != self.nwalkers {
                    return Err(SamplerError::CachedLength {
                        name,
                        expected: self.nwalkers,
                        got: values.len(),
                    });
                }
            }
        }

        let Start {
            mut positions,
            lnprior: lnprior0,
            lnlike: lnlike0,
            lnprop: lnprop0,
        } = start;
        let nwalkers = self.nwalkers;

        // First call fits the proposal; later calls keep sampling from the
        // one the previous call left behind.
        let mut proposal = match self.proposal.take() {
            Some(proposal) => proposal,
            None => {
                debug!("fitting initial proposal from {} walkers", nwalkers);
                self.builder.build(positions.view(), self.pool.as_ref())?
            }
        };

        // Cached scalars are trusted verbatim; missing ones are evaluated
        // over the whole batch in a single call each.
        let mut lnprior = match lnprior0 {
            Some(values) => values,
            None => self.lnprior.log_prob_batch(positions.view()),
        };
        let mut lnlike = match lnlike0 {
            Some(values) => values,
            None => self.lnlike.log_prob_batch(positions.view()),
        };
        let mut lnq = match lnprop0 {
            Some(values) => values,
            None => proposal.log_prob_batch(positions.view()),
        };

        // Grow this call's worth of zero-filled history up front; the loop
        // fills the slots by index.
        self.chain
            .append(Axis(0), Array3::zeros((iterations, nwalkers, self.ndim)).view())
            .unwrap();
        self.lnpost
            .append(Axis(0), Array2::zeros((iterations, nwalkers)).view())
            .unwrap();
        self.lnprop
            .append(Axis(0), Array2::zeros((iterations, nwalkers)).view())
            .unwrap();
        self.accepted
            .append(Axis(0), Array2::from_elem((iterations, nwalkers), false).view())
            .unwrap();

        // Sliding window of 100 steps for the reported acceptance probability,
        // carried only while a progress bar is attached.
        let window_size = 100;
        let mut progress = progress.map(|pb| (pb, VecDeque::<f64>::with_capacity(window_size)));

        for _ in 0..iterations {
            // Candidates are i.i.d. draws from the proposal; the walkers'
            // current positions play no part in generating them.
            let candidates = proposal.draw(&mut self.rng, nwalkers);

            // Score the whole candidate batch.
            let lnprior_p = self.lnprior.log_prob_batch(candidates.view());
            let lnlike_p = self.lnlike.log_prob_batch(candidates.view());
            let lnq_p = proposal.log_prob_batch(candidates.view());

            // Per-walker log Metropolis-Hastings ratio; the lnq - lnq_p term
            // corrects for the asymmetric, data-dependent proposal density.
            let ln_ratio = &lnprior_p + &lnlike_p - &lnprior - &lnlike + &lnq - &lnq_p;

            // A positive ratio accepts outright; everyone else draws one
            // uniform. A NaN ratio fails both comparisons and rejects.
            let accept = ln_ratio.mapv(|r| {
                if r > T::zero() {
                    true
                } else {
                    let u: T = self.rng.gen();
                    r > u.ln()
                }
            });

            // Accepted walkers take the candidate row and all three
            // log-densities in the same operation; rejected walkers keep
            // everything, including the proposal density of the old fit.
            for (walker, &acc) in accept.iter().enumerate() {
                if acc {
                    positions.row_mut(walker).assign(&candidates.row(walker));
                    lnprior[walker] = lnprior_p[walker];
                    lnlike[walker] = lnlike_p[walker];
                    lnq[walker] = lnq_p[walker];
                }
            }

            // Snapshot the full ensemble into this step's history slot.
            let step = self.iterations;
            self.chain.index_axis_mut(Axis(0), step).assign(&positions);
            self.lnpost.row_mut(step).assign(&(&lnprior + &lnlike));
            self.lnprop.row_mut(step).assign(&lnq);
            self.accepted.row_mut(step).assign(&accept);
            self.iterations += 1;

            if let Some((pb, window)) = progress.as_mut() {
                let rate = accept.iter().filter(|&&acc| acc).count() as f64 / nwalkers as f64;
                window.push_front(rate);
                if window.len() > window_size {
                    window.pop_back();
                }
                let avg: f64 = window.iter().sum::<f64>() / window.len() as f64;
                pb.set_message(format!("p(accept)≈{:.2}", avg));
                pb.inc(1);
            }

            // Refit on the lifetime step count so consecutive runs continue
            // one cadence. Walkers are re-scored under the new fit; prior and
            // likelihood are unaffected by a proposal change.
            if self.iterations % update_interval == 0 {
                debug!("refitting proposal at iteration {}", self.iterations);
                match self.builder.build(positions.view(), self.pool.as_ref()) {
                    Ok(fresh) => {
                        proposal = fresh;
                        lnq = proposal.log_prob_batch(positions.view());
                    }
                    Err(err) => {
                        // Keep the previous fit so the sampler stays usable.
                        self.proposal = Some(proposal);
                        return Err(err);
                    }
                }
            }
        }

        self.proposal = Some(proposal);
        Ok(EnsembleState {
            positions,
            lnprior,
            lnlike,
            lnprop: lnq,
        })
    }

    /// Number of walkers in the ensemble.
    pub fn nwalkers(&self) -> usize {
        self.nwalkers
    }

    /// Dimension of the parameter space.
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// Steps completed over the sampler's lifetime.
    ///
    /// This is the authoritative history length: if a run fails partway
    /// through, only this many steps were recorded, and the history views
    /// below expose exactly that many.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Walker positions at every completed step, shape
    /// `(iterations, nwalkers, ndim)`.
    pub fn chain(&self) -> ArrayView3<T> {
        self.chain.slice(s![..self.iterations, .., ..])
    }

    /// Summed `lnprior + lnlike` at every completed step, shape
    /// `(iterations, nwalkers)`.
    pub fn lnpost(&self) -> ArrayView2<T> {
        self.lnpost.slice(s![..self.iterations, ..])
    }

    /// Proposal log-density of every walker at every completed step, shape
    /// `(iterations, nwalkers)`.
    pub fn lnprop(&self) -> ArrayView2<T> {
        self.lnprop.slice(s![..self.iterations, ..])
    }

    /// Acceptance flags at every completed step, shape
    /// `(iterations, nwalkers)`.
    pub fn accepted(&self) -> ArrayView2<bool> {
        self.accepted.slice(s![..self.iterations, ..])
    }

    /// Fraction of accepted proposals per walker over all completed steps,
    /// zero for a sampler that has not stepped yet.
    pub fn acceptance_fraction(&self) -> Array1<f64> {
        let mut fraction = Array1::zeros(self.nwalkers);
        if self.iterations == 0 {
            return fraction;
        }
        for row in self.accepted().outer_iter() {
            for (walker, &acc) in row.iter().enumerate() {
                if acc {
                    fraction[walker] += 1.0;
                }
            }
        }
        fraction / self.iterations as f64
    }
}
