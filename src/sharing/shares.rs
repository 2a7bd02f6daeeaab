//! Additive secret sharing of weight vectors
//!
//! A secret is split into `n` shares: `n - 1` are drawn uniformly from
//! `[-max_magnitude, max_magnitude]` and the last one is the secret minus their
//! sum, so all `n` always add back up to the secret. Any `n - 1` shares reveal
//! nothing about the secret as long as `max_magnitude` dominates its values.

use super::rng::{share_rng, RngSecurity, ShareRng};
use crate::error::{FedError, Result};
use crate::protocol::ParticipantId;
use crate::weights::{self, sum_refs, WeightVector};
use std::collections::{BTreeMap, BTreeSet};

/// Split `secret` into `n_participants` additive shares
pub fn generate_all_shares(
    secret: &WeightVector,
    n_participants: usize,
    max_magnitude: f64,
    security: RngSecurity,
) -> Result<Vec<WeightVector>> {
    validate(n_participants, max_magnitude)?;
    let mut rng = share_rng(security)?;
    generate_all_shares_with(secret, n_participants, max_magnitude, rng.as_mut())
}

/// Same as [`generate_all_shares`] with an explicit random strategy
pub fn generate_all_shares_with(
    secret: &WeightVector,
    n_participants: usize,
    max_magnitude: f64,
    rng: &mut dyn ShareRng,
) -> Result<Vec<WeightVector>> {
    validate(n_participants, max_magnitude)?;
    if n_participants == 1 {
        return Ok(vec![secret.clone()]);
    }

    let shapes = secret.shapes();
    let mut shares: Vec<WeightVector> = (0..n_participants - 1)
        .map(|_| {
            WeightVector::new(
                shapes
                    .iter()
                    .map(|&shape| rng.sample(shape, max_magnitude))
                    .collect(),
            )
        })
        .collect();

    let drawn = weights::sum(&shares)?;
    shares.push(weights::subtract(secret, &drawn)?);
    Ok(shares)
}

/// Rebuild a secret from every one of its shares
///
/// Summing a strict subset gives a wrong result that cannot be detected here;
/// use a [`ShareSet`] when completeness has to be checked.
pub fn reconstruct_secret(shares: &[WeightVector]) -> Result<WeightVector> {
    weights::sum(shares)
}

fn validate(n_participants: usize, max_magnitude: f64) -> Result<()> {
    if n_participants == 0 {
        return Err(FedError::InvalidParameter(
            "cannot split a secret into zero shares".into(),
        ));
    }
    if !max_magnitude.is_finite() || max_magnitude < 0.0 {
        return Err(FedError::InvalidParameter(format!(
            "share magnitude must be finite and non-negative, got {}",
            max_magnitude
        )));
    }
    // Uniform sampling over [-m, m] needs the width 2m to stay finite
    if max_magnitude > f64::MAX / 2.0 {
        return Err(FedError::InvalidParameter(format!(
            "share magnitude {} is too large to sample",
            max_magnitude
        )));
    }
    Ok(())
}

/// Shares (or partial sums) collected from an expected set of contributors
#[derive(Debug, Clone)]
pub struct ShareSet {
    expected: BTreeSet<ParticipantId>,
    received: BTreeMap<ParticipantId, WeightVector>,
}

impl ShareSet {
    pub fn new(expected: impl IntoIterator<Item = ParticipantId>) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            received: BTreeMap::new(),
        }
    }

    /// Record a contribution; returns false for unexpected or duplicate senders
    pub fn insert(&mut self, from: ParticipantId, share: WeightVector) -> bool {
        if !self.expected.contains(&from) || self.received.contains_key(&from) {
            return false;
        }
        self.received.insert(from, share);
        true
    }

    pub fn contains(&self, from: &ParticipantId) -> bool {
        self.received.contains_key(from)
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.expected.len()
    }

    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    /// Expected contributors that have not delivered yet
    pub fn missing(&self) -> Vec<ParticipantId> {
        self.expected
            .iter()
            .filter(|id| !self.received.contains_key(*id))
            .copied()
            .collect()
    }

    /// Sum of whatever has arrived so far
    pub fn partial_sum(&self) -> Result<WeightVector> {
        let parts: Vec<&WeightVector> = self.received.values().collect();
        sum_refs(&parts)
    }

    /// Sum of all expected contributions, refusing partial sets
    pub fn reconstruct(&self) -> Result<WeightVector> {
        if !self.is_complete() {
            return Err(FedError::IncompleteShareSet {
                expected: self.expected.len(),
                received: self.received.len(),
            });
        }
        self.partial_sum()
    }
}
