//! Weight vectors — the opaque model parameters being aggregated
//!
//! Provides the elementwise algebra used by averaging and secret sharing, and
//! the codec that carries vectors inside protocol messages.

mod algebra;
pub mod codec;

pub use algebra::{add, average, check_compatible, subtract, sum, Shape, WeightVector};
pub(crate) use algebra::sum_refs;
pub use codec::{decode, encode, is_valid_encoding, EncodedLayer, EncodedWeights};
