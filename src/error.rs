//! Error type shared by the sampler and the stock proposal machinery.

use thiserror::Error;

/// Everything that can go wrong while constructing or running an
/// [`EnsembleSampler`](crate::ensemble::EnsembleSampler).
///
/// Contract violations are reported before any sampler state is touched, so
/// a returned error never leaves the ensemble, the history, or the proposal
/// in a half-updated state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplerError {
    /// Walker count and dimension must both be at least one.
    #[error("ensemble needs at least one walker and one dimension, got {nwalkers} walker(s) of dimension {ndim}")]
    EmptyEnsemble { nwalkers: usize, ndim: usize },

    /// Initial positions did not match the sampler's `(nwalkers, ndim)` shape.
    #[error("initial positions have shape ({got_walkers}, {got_dim}), expected ({nwalkers}, {ndim})")]
    PositionShape {
        nwalkers: usize,
        ndim: usize,
        got_walkers: usize,
        got_dim: usize,
    },

    /// A caller-supplied cached array had the wrong length.
    #[error("cached {name} values have length {got}, expected {expected}")]
    CachedLength {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    /// `run` was asked for zero steps.
    #[error("iterations must be at least 1")]
    NoIterations,

    /// `run` was given a zero proposal-update interval.
    #[error("update_interval must be at least 1")]
    ZeroUpdateInterval,

    /// Fewer than two walkers were available to fit a proposal from.
    #[error("cannot fit a proposal from {len} point(s), need at least 2")]
    EnsembleTooSmall { len: usize },

    /// The ensemble has collapsed along one dimension, leaving the density
    /// estimate without a usable bandwidth.
    #[error("cannot fit a proposal: ensemble is degenerate along dimension {dim}")]
    DegenerateEnsemble { dim: usize },
}
