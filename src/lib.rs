/*!
Ensemble MCMC with an adaptive kernel-density independence proposal.

A population of walkers is advanced in lockstep: candidates are drawn i.i.d.
from a density estimate fitted to the ensemble itself, accepted per walker
with the proposal-corrected Metropolis-Hastings ratio, and the estimate is
refit on a configurable cadence as the ensemble moves. See
[`ensemble::EnsembleSampler`] for the full picture.
*/

pub mod distributions;
pub mod ensemble;
pub mod error;
pub mod proposal;
