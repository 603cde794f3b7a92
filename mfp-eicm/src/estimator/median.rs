//! Square median filter with reflected borders

use ndarray::Array2;

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

/// Median filter over a size×size window. A size below 2 returns the
/// input unchanged.
pub fn median_filter(data: &Array2<f32>, size: usize) -> Array2<f32> {
    if size < 2 {
        return data.clone();
    }
    let (height, width) = data.dim();
    let offset = size as isize / 2;
    let mut window = Vec::with_capacity(size * size);

    Array2::from_shape_fn((height, width), |(y, x)| {
        window.clear();
        for dy in -offset..(size as isize - offset) {
            for dx in -offset..(size as isize - offset) {
                let sy = reflect(y as isize + dy, height);
                let sx = reflect(x as isize + dx, width);
                window.push(data[[sy, sx]]);
            }
        }
        window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        window[window.len() / 2]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_isolated_outlier() {
        let mut data = Array2::from_elem((9, 9), 10.0f32);
        data[[4, 4]] = 1000.0;
        let filtered = median_filter(&data, 3);
        assert_eq!(filtered[[4, 4]], 10.0);
    }

    #[test]
    fn constant_image_unchanged() {
        let data = Array2::from_elem((5, 7), 3.5f32);
        let filtered = median_filter(&data, 3);
        assert_eq!(filtered, data);
    }

    #[test]
    fn border_reflection() {
        assert_eq!(reflect(-1, 8), 0);
        assert_eq!(reflect(-2, 8), 1);
        assert_eq!(reflect(8, 8), 7);
        assert_eq!(reflect(9, 8), 6);
        assert_eq!(reflect(3, 8), 3);
    }
}
