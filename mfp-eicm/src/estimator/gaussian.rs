//! 2D Gaussian least-squares fit
//!
//! The shading reference is modeled as an elliptical 2D Gaussian. Taking
//! the logarithm turns the model into a quadratic surface
//! q(x, y) = c0 + c1·x + c2·y + c3·x² + c4·xy + c5·y², which is fitted by
//! weighted linear least squares (weights proportional to intensity, so
//! dim pixels do not dominate the log residuals). Coordinates are scaled
//! to unit range for conditioning, following the usual normalization
//! trick for direct fits.

use nalgebra::{Matrix2, Matrix6, Vector2, Vector6};
use ndarray::Array2;

use super::EstimateError;

/// Result of a 2D Gaussian fit in normalized coordinates.
#[derive(Debug, Clone)]
pub struct GaussianFit {
    /// Quadratic log-surface coefficients [c0, c1, c2, c3, c4, c5].
    pub coefficients: [f64; 6],
    /// Coordinate scale used for normalization (pixels).
    scale: f64,
    /// Peak height of the fitted Gaussian.
    pub amplitude: f64,
    /// Peak position in pixel coordinates (x, y).
    pub center: (f64, f64),
    /// Principal standard deviations in pixels.
    pub sigma: (f64, f64),
}

/// Fit an elliptical 2D Gaussian to the image.
pub fn fit_gaussian_2d(data: &Array2<f32>) -> Result<GaussianFit, EstimateError> {
    let (height, width) = data.dim();
    let scale = width.max(height) as f64;

    // Weighted normal equations over the log-domain quadratic basis.
    let mut ata = Matrix6::<f64>::zeros();
    let mut atb = Vector6::<f64>::zeros();
    let mut samples = 0usize;
    for ((y, x), &value) in data.indexed_iter() {
        if value <= 0.0 {
            continue;
        }
        let z = value as f64;
        let u = x as f64 / scale;
        let v = y as f64 / scale;
        let basis = Vector6::new(1.0, u, v, u * u, u * v, v * v);
        let w2 = z * z;
        ata += basis * basis.transpose() * w2;
        atb += basis * (w2 * z.ln());
        samples += 1;
    }
    if samples < 6 {
        return Err(EstimateError::Fit(format!(
            "only {} positive pixels, need at least 6",
            samples
        )));
    }

    let solution = ata
        .svd(true, true)
        .solve(&atb, 1e-12)
        .map_err(|e| EstimateError::Fit(e.to_string()))?;
    let c: [f64; 6] = [
        solution[0],
        solution[1],
        solution[2],
        solution[3],
        solution[4],
        solution[5],
    ];

    // Peak position: zero gradient of the quadratic.
    let hessian = Matrix2::new(2.0 * c[3], c[4], c[4], 2.0 * c[5]);
    let gradient = Vector2::new(-c[1], -c[2]);
    let center_norm = hessian
        .try_inverse()
        .map(|inv| inv * gradient)
        .ok_or_else(|| EstimateError::Fit("degenerate quadratic surface".to_string()))?;

    let q_center = c[0]
        + c[1] * center_norm[0]
        + c[2] * center_norm[1]
        + c[3] * center_norm[0] * center_norm[0]
        + c[4] * center_norm[0] * center_norm[1]
        + c[5] * center_norm[1] * center_norm[1];

    // Principal widths from the eigenvalues of the negated curvature.
    let curvature = Matrix2::new(-c[3], -c[4] / 2.0, -c[4] / 2.0, -c[5]);
    let eigen = curvature.symmetric_eigen();
    let sigma_of = |lambda: f64| {
        if lambda > 0.0 {
            (1.0 / (2.0 * lambda)).sqrt() * scale
        } else {
            f64::NAN
        }
    };

    Ok(GaussianFit {
        coefficients: c,
        scale,
        amplitude: q_center.exp(),
        center: (center_norm[0] * scale, center_norm[1] * scale),
        sigma: (
            sigma_of(eigen.eigenvalues[0]),
            sigma_of(eigen.eigenvalues[1]),
        ),
    })
}

impl GaussianFit {
    /// Evaluate the fitted Gaussian over an image of the given shape.
    pub fn fitted_matrix(&self, shape: (usize, usize)) -> Array2<f32> {
        let c = self.coefficients;
        let scale = self.scale;
        Array2::from_shape_fn(shape, |(y, x)| {
            let u = x as f64 / scale;
            let v = y as f64 / scale;
            let q = c[0] + c[1] * u + c[2] * v + c[3] * u * u + c[4] * u * v + c[5] * v * v;
            q.exp() as f32
        })
    }

    /// Human-readable fit summary for the provenance note.
    pub fn describe(&self) -> String {
        format!(
            "* coefficients: {:?}\n* amplitude: {:.4}\n* center: ({:.2}, {:.2})\n* sigma: ({:.2}, {:.2})",
            self.coefficients, self.amplitude, self.center.0, self.center.1, self.sigma.0, self.sigma.1
        )
    }
}
