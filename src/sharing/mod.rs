//! Secret sharing engine
//!
//! Splits weight vectors into additive shares so participants can sum their
//! vectors without revealing them individually:
//! - **Shares**: generation, reconstruction and completeness tracking
//! - **RNG**: pluggable random strategies keyed by security level

mod rng;
mod shares;

pub use rng::{share_rng, InsecureRng, RngSecurity, ShareRng};
pub use shares::{generate_all_shares, generate_all_shares_with, reconstruct_secret, ShareSet};
