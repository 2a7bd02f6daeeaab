//! Elementwise algebra over weight vectors
//!
//! Every multi-operand operation checks that all operands have the same number
//! of tensors and the same shape at every position before computing anything.

use crate::error::{FedError, Result};
use nalgebra::DMatrix;

/// Shape of a single tensor: (rows, cols)
pub type Shape = (usize, usize);

/// An ordered list of tensors holding a model's parameters
#[derive(Debug, Clone, PartialEq)]
pub struct WeightVector {
    layers: Vec<DMatrix<f64>>,
}

impl WeightVector {
    pub fn new(layers: Vec<DMatrix<f64>>) -> Self {
        Self { layers }
    }

    /// Build a vector of column tensors from plain slices
    pub fn from_columns(columns: &[&[f64]]) -> Self {
        Self::new(
            columns
                .iter()
                .map(|values| DMatrix::from_column_slice(values.len(), 1, values))
                .collect(),
        )
    }

    /// A vector of zeros with the given shapes
    pub fn zeros(shapes: &[Shape]) -> Self {
        Self::new(shapes.iter().map(|&(r, c)| DMatrix::zeros(r, c)).collect())
    }

    pub fn layers(&self) -> &[DMatrix<f64>] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<DMatrix<f64>> {
        self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn shapes(&self) -> Vec<Shape> {
        self.layers.iter().map(|m| m.shape()).collect()
    }

    /// Total number of scalar parameters
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|m| m.len()).sum()
    }

    /// Flatten every tensor (column-major) into one list
    pub fn to_flat(&self) -> Vec<f64> {
        self.layers
            .iter()
            .flat_map(|m| m.as_slice().iter().copied())
            .collect()
    }

    /// Divide every element by `divisor`
    pub fn scale_down(&self, divisor: f64) -> Self {
        Self::new(self.layers.iter().map(|m| m / divisor).collect())
    }

    /// Largest absolute elementwise difference, if shapes match
    pub fn max_abs_diff(&self, other: &WeightVector) -> Result<f64> {
        check_compatible(&[self, other])?;
        Ok(self
            .layers
            .iter()
            .zip(&other.layers)
            .flat_map(|(a, b)| a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()))
            .fold(0.0, f64::max))
    }
}

impl From<Vec<DMatrix<f64>>> for WeightVector {
    fn from(layers: Vec<DMatrix<f64>>) -> Self {
        Self::new(layers)
    }
}

/// Check that every operand has the same length and per-position shapes
pub fn check_compatible(operands: &[&WeightVector]) -> Result<()> {
    let Some(first) = operands.first() else {
        return Ok(());
    };
    for (idx, other) in operands.iter().enumerate().skip(1) {
        if other.len() != first.len() {
            return Err(FedError::DimensionMismatch(format!(
                "operand {} has {} tensors, expected {}",
                idx,
                other.len(),
                first.len()
            )));
        }
        for (pos, (a, b)) in first.layers.iter().zip(&other.layers).enumerate() {
            if a.shape() != b.shape() {
                return Err(FedError::DimensionMismatch(format!(
                    "operand {} position {} has shape {:?}, expected {:?}",
                    idx,
                    pos,
                    b.shape(),
                    a.shape()
                )));
            }
        }
    }
    Ok(())
}

pub fn add(a: &WeightVector, b: &WeightVector) -> Result<WeightVector> {
    check_compatible(&[a, b])?;
    Ok(WeightVector::new(
        a.layers.iter().zip(&b.layers).map(|(x, y)| x + y).collect(),
    ))
}

pub fn subtract(a: &WeightVector, b: &WeightVector) -> Result<WeightVector> {
    check_compatible(&[a, b])?;
    Ok(WeightVector::new(
        a.layers.iter().zip(&b.layers).map(|(x, y)| x - y).collect(),
    ))
}

/// Elementwise sum of a non-empty list of vectors
pub fn sum(summands: &[WeightVector]) -> Result<WeightVector> {
    let refs: Vec<&WeightVector> = summands.iter().collect();
    sum_refs(&refs)
}

pub(crate) fn sum_refs(summands: &[&WeightVector]) -> Result<WeightVector> {
    let Some(first) = summands.first() else {
        return Err(FedError::EmptyAggregation);
    };
    check_compatible(summands)?;
    let mut layers = first.layers.clone();
    for other in &summands[1..] {
        for (acc, layer) in layers.iter_mut().zip(&other.layers) {
            *acc += layer;
        }
    }
    Ok(WeightVector::new(layers))
}

/// Elementwise mean, the federated average
pub fn average(vectors: &[WeightVector]) -> Result<WeightVector> {
    let total = sum(vectors)?;
    Ok(total.scale_down(vectors.len() as f64))
}
