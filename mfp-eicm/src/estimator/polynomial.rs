//! 2D polynomial surface fit
//!
//! Fits z(x, y) = Σ c_ij · xⁱ·yʲ over the term set with i, j ≤ degree and
//! i + j ≤ order, by linear least squares on coordinates normalized to
//! [-1, 1]. The fitted surface is evaluated over the full image grid.

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;

use super::EstimateError;

/// Result of a polynomial surface fit.
#[derive(Debug, Clone)]
pub struct PolynomialFit {
    pub terms: Vec<(usize, usize)>,
    pub coefficients: Vec<f64>,
    /// Fitted surface, same shape as the input.
    pub surface: Array2<f32>,
}

fn term_set(degree: usize, order: usize) -> Vec<(usize, usize)> {
    let mut terms = Vec::new();
    for i in 0..=degree {
        for j in 0..=degree {
            if i + j <= order {
                terms.push((i, j));
            }
        }
    }
    terms
}

/// Normalize an index to [-1, 1].
fn norm(index: usize, len: usize) -> f64 {
    if len <= 1 {
        0.0
    } else {
        2.0 * index as f64 / (len - 1) as f64 - 1.0
    }
}

/// Fit a 2D polynomial of the given degree/order to the image.
pub fn polynomial_fit(
    data: &Array2<f32>,
    degree: usize,
    order: usize,
) -> Result<PolynomialFit, EstimateError> {
    let (height, width) = data.dim();
    let terms = term_set(degree, order);
    let n_terms = terms.len();
    if height * width < n_terms {
        return Err(EstimateError::Fit(format!(
            "{} pixels cannot constrain {} polynomial terms",
            height * width,
            n_terms
        )));
    }

    // Normal equations: accumulating AᵀA and Aᵀb avoids materializing the
    // full Vandermonde matrix for megapixel inputs.
    let mut ata = DMatrix::<f64>::zeros(n_terms, n_terms);
    let mut atb = DVector::<f64>::zeros(n_terms);
    let mut basis = vec![0.0f64; n_terms];
    for ((y, x), &value) in data.indexed_iter() {
        let u = norm(x, width);
        let v = norm(y, height);
        for (k, &(i, j)) in terms.iter().enumerate() {
            basis[k] = u.powi(i as i32) * v.powi(j as i32);
        }
        for r in 0..n_terms {
            for c in 0..n_terms {
                ata[(r, c)] += basis[r] * basis[c];
            }
            atb[r] += basis[r] * value as f64;
        }
    }

    let coefficients = ata
        .svd(true, true)
        .solve(&atb, 1e-12)
        .map_err(|e| EstimateError::Fit(e.to_string()))?;

    let surface = Array2::from_shape_fn((height, width), |(y, x)| {
        let u = norm(x, width);
        let v = norm(y, height);
        terms
            .iter()
            .zip(coefficients.iter())
            .map(|(&(i, j), &c)| c * u.powi(i as i32) * v.powi(j as i32))
            .sum::<f64>() as f32
    });

    Ok(PolynomialFit {
        terms,
        coefficients: coefficients.iter().copied().collect(),
        surface,
    })
}

impl PolynomialFit {
    /// Human-readable fit summary for the provenance note.
    pub fn describe(&self) -> String {
        self.terms
            .iter()
            .zip(self.coefficients.iter())
            .map(|(&(i, j), c)| format!("* c[x^{} y^{}]: {:.6e}", i, j, c))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_set_respects_caps() {
        let terms = term_set(4, 4);
        assert!(terms.contains(&(4, 0)));
        assert!(terms.contains(&(2, 2)));
        assert!(!terms.contains(&(3, 2)));
        assert!(terms.iter().all(|&(i, j)| i + j <= 4));
    }

    #[test]
    fn recovers_quadratic_surface() {
        // z = 5 + 2u - 3v + uv in normalized coordinates.
        let data = Array2::from_shape_fn((64, 96), |(y, x)| {
            let u = norm(x, 96);
            let v = norm(y, 64);
            (5.0 + 2.0 * u - 3.0 * v + u * v) as f32
        });
        let fit = polynomial_fit(&data, 2, 2).unwrap();

        for ((y, x), &value) in data.indexed_iter() {
            assert!((fit.surface[[y, x]] - value).abs() < 1e-3);
        }
    }

    #[test]
    fn surface_shape_matches_input() {
        let data = Array2::from_elem((33, 17), 1.0f32);
        let fit = polynomial_fit(&data, 4, 4).unwrap();
        assert_eq!(fit.surface.dim(), (33, 17));
    }
}
