//! Separable Gaussian blur with reflected borders

use ndarray::Array2;

fn kernel(sigma: f32) -> Vec<f32> {
    // Radius of four standard deviations, matching common ndimage
    // truncation.
    let radius = (4.0 * sigma).ceil().max(1.0) as isize;
    let mut weights: Vec<f32> = (-radius..=radius)
        .map(|i| (-(i as f32).powi(2) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

fn reflect(index: isize, len: usize) -> usize {
    let len = len as isize;
    let mut i = index;
    if i < 0 {
        i = -i - 1;
    }
    if i >= len {
        i = 2 * len - i - 1;
    }
    i.clamp(0, len - 1) as usize
}

/// Gaussian blur, applied separably along rows then columns.
pub fn gaussian_blur(data: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 {
        return data.clone();
    }
    let weights = kernel(sigma);
    let radius = (weights.len() / 2) as isize;
    let (height, width) = data.dim();

    let rows = Array2::from_shape_fn((height, width), |(y, x)| {
        weights
            .iter()
            .enumerate()
            .map(|(k, w)| {
                let sx = reflect(x as isize + k as isize - radius, width);
                w * data[[y, sx]]
            })
            .sum::<f32>()
    });
    Array2::from_shape_fn((height, width), |(y, x)| {
        weights
            .iter()
            .enumerate()
            .map(|(k, w)| {
                let sy = reflect(y as isize + k as isize - radius, height);
                w * rows[[sy, x]]
            })
            .sum::<f32>()
    })
}
