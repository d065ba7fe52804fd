//! Built-in fitting methods: linear, polynomial and point table.
//!
//! Every method takes reference points (raw instrument output paired with a
//! trusted reference value) plus a parameter bag decoded into a typed
//! struct, and produces a [`CalibrationData`] that reproduces the
//! reference set as closely as its model allows.

use serde::Deserialize;
use serde_json::Value;

use super::{CalibrationData, CalibrationPoint, ReferencePoint};
use crate::error::CalibrationError;

/// Highest polynomial degree accepted; beyond this the normal equations
/// are too ill-conditioned for f64.
pub const MAX_POLYNOMIAL_DEGREE: usize = 8;

/// Pivots smaller than this are treated as a singular system.
const SINGULAR_EPSILON: f64 = 1e-12;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolynomialParams {
    #[serde(default = "default_degree")]
    degree: usize,
}

fn default_degree() -> usize {
    2
}

/// Decode a parameter bag; `null` means "all defaults".
fn decode_params<T: for<'de> Deserialize<'de>>(params: &Value) -> Result<T, CalibrationError> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|e| CalibrationError::InvalidParams(e.to_string()))
}

// ── Linear ────────────────────────────────────────────────────

/// Least-squares line through the reference points.
pub fn linear(
    points: &[ReferencePoint],
    _params: &Value,
) -> Result<CalibrationData, CalibrationError> {
    if points.len() < 2 {
        return Err(CalibrationError::InsufficientPoints {
            method: "linear",
            required: 2,
            provided: points.len(),
        });
    }
    let n = points.len() as f64;
    let mean_raw = points.iter().map(|p| p.raw).sum::<f64>() / n;
    let mean_ref = points.iter().map(|p| p.reference).sum::<f64>() / n;

    let (mut sxx, mut sxy) = (0.0, 0.0);
    for p in points {
        let dx = p.raw - mean_raw;
        sxx += dx * dx;
        sxy += dx * (p.reference - mean_ref);
    }
    if sxx.abs() < SINGULAR_EPSILON {
        return Err(CalibrationError::Degenerate("all raw values are identical"));
    }
    let scale = sxy / sxx;
    Ok(CalibrationData::Linear {
        offset: mean_ref - scale * mean_raw,
        scale,
    })
}

// ── Polynomial ────────────────────────────────────────────────

/// Least-squares polynomial of `degree` (default 2) via the normal equations.
pub fn polynomial(
    points: &[ReferencePoint],
    params: &Value,
) -> Result<CalibrationData, CalibrationError> {
    let PolynomialParams { degree } = decode_params(params)?;
    if degree > MAX_POLYNOMIAL_DEGREE {
        return Err(CalibrationError::InvalidParams(format!(
            "degree {degree} exceeds maximum {MAX_POLYNOMIAL_DEGREE}"
        )));
    }
    let terms = degree + 1;
    if points.len() < terms {
        return Err(CalibrationError::InsufficientPoints {
            method: "polynomial",
            required: terms,
            provided: points.len(),
        });
    }

    // Augmented normal matrix [XᵀX | Xᵀy].
    let mut m = vec![vec![0.0f64; terms + 1]; terms];
    for p in points {
        let mut powers = vec![1.0f64; 2 * terms - 1];
        for k in 1..powers.len() {
            powers[k] = powers[k - 1] * p.raw;
        }
        for (i, row) in m.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().take(terms).enumerate() {
                *cell += powers[i + j];
            }
            row[terms] += p.reference * powers[i];
        }
    }

    let coefficients = solve(m)?;
    Ok(CalibrationData::Polynomial { coefficients })
}

/// Gaussian elimination with partial pivoting on an augmented matrix.
fn solve(mut m: Vec<Vec<f64>>) -> Result<Vec<f64>, CalibrationError> {
    let n = m.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))
            .unwrap_or(col);
        if m[pivot][col].abs() < SINGULAR_EPSILON {
            return Err(CalibrationError::Degenerate(
                "reference raw values do not determine the polynomial",
            ));
        }
        m.swap(col, pivot);
        for row in col + 1..n {
            let factor = m[row][col] / m[col][col];
            for k in col..=n {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| m[row][k] * x[k]).sum();
        x[row] = (m[row][n] - tail) / m[row][row];
    }
    Ok(x)
}

// ── Point table ───────────────────────────────────────────────

/// Piecewise-linear table through the reference points.
///
/// Points sharing a raw value are averaged so the table stays a function.
pub fn point(
    points: &[ReferencePoint],
    _params: &Value,
) -> Result<CalibrationData, CalibrationError> {
    let table = points
        .iter()
        .map(|p| CalibrationPoint {
            raw: p.raw,
            reference: p.reference,
        })
        .collect();
    CalibrationData::Point { points: table }.normalized()
}
