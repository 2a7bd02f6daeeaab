//! Wire encoding for weight vectors
//!
//! Each tensor travels as its dimensions plus the hex of its little-endian f64
//! bytes (column-major). A SHA256 checksum over all layers lets receivers reject
//! truncated or tampered payloads before decoding.

use super::WeightVector;
use crate::error::{FedError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const F64_BYTES: usize = std::mem::size_of::<f64>();

/// One encoded tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedLayer {
    pub rows: usize,
    pub cols: usize,
    /// Hex of the little-endian element bytes
    pub data: String,
}

/// An encoded weight vector as carried inside protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedWeights {
    pub layers: Vec<EncodedLayer>,
    pub checksum: String,
}

pub fn encode(weights: &WeightVector) -> EncodedWeights {
    let raw: Vec<(usize, usize, Vec<u8>)> = weights
        .layers()
        .iter()
        .map(|m| {
            let bytes = m.as_slice().iter().flat_map(|v| v.to_le_bytes()).collect();
            (m.nrows(), m.ncols(), bytes)
        })
        .collect();
    let checksum = checksum(raw.iter().map(|(r, c, b)| (*r, *c, b.as_slice())));
    EncodedWeights {
        layers: raw
            .into_iter()
            .map(|(rows, cols, bytes)| EncodedLayer {
                rows,
                cols,
                data: hex::encode(bytes),
            })
            .collect(),
        checksum,
    }
}

pub fn decode(encoded: &EncodedWeights) -> Result<WeightVector> {
    let raw = decode_layers(encoded)?;
    let expected = checksum(raw.iter().map(|(r, c, b)| (*r, *c, b.as_slice())));
    if expected != encoded.checksum {
        return Err(FedError::InvalidMessage("weights checksum mismatch".into()));
    }
    let layers = raw
        .into_iter()
        .map(|(rows, cols, bytes)| {
            let values: Vec<f64> = bytes
                .chunks_exact(F64_BYTES)
                .map(|chunk| {
                    let mut buf = [0u8; F64_BYTES];
                    buf.copy_from_slice(chunk);
                    f64::from_le_bytes(buf)
                })
                .collect();
            DMatrix::from_vec(rows, cols, values)
        })
        .collect();
    Ok(WeightVector::new(layers))
}

/// Validity predicate used by the message validators
pub fn is_valid_encoding(encoded: &EncodedWeights) -> bool {
    match decode_layers(encoded) {
        Ok(raw) => checksum(raw.iter().map(|(r, c, b)| (*r, *c, b.as_slice()))) == encoded.checksum,
        Err(_) => false,
    }
}

fn decode_layers(encoded: &EncodedWeights) -> Result<Vec<(usize, usize, Vec<u8>)>> {
    encoded
        .layers
        .iter()
        .enumerate()
        .map(|(pos, layer)| {
            let bytes = hex::decode(&layer.data).map_err(|e| {
                FedError::InvalidMessage(format!("layer {} is not valid hex: {}", pos, e))
            })?;
            let expected = layer
                .rows
                .checked_mul(layer.cols)
                .and_then(|n| n.checked_mul(F64_BYTES));
            if expected != Some(bytes.len()) {
                return Err(FedError::InvalidMessage(format!(
                    "layer {} holds {} bytes, shape {}x{}",
                    pos,
                    bytes.len(),
                    layer.rows,
                    layer.cols
                )));
            }
            Ok((layer.rows, layer.cols, bytes))
        })
        .collect()
}

fn checksum<'a>(layers: impl Iterator<Item = (usize, usize, &'a [u8])>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"fedshare-weights-v1");
    for (rows, cols, bytes) in layers {
        hasher.update((rows as u64).to_le_bytes());
        hasher.update((cols as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hex::encode(hasher.finalize())
}
