use nalgebra as na;
use ndarray::{Array1, ArrayView1};

/// Cosine similarity in [-1, 1]; `None` on a dimension mismatch or a zero vector.
pub fn cosine_similarity(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return None;
    }

    Some((a.dot(&b) / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Scales to unit L2 norm, `None` for an all-zero or non-finite vector.
pub fn l2_normalize(v: Array1<f32>) -> Option<Array1<f32>> {
    let norm = v.dot(&v).sqrt();

    if !norm.is_finite() || norm <= f32::EPSILON {
        return None;
    }

    Some(v / norm)
}

#[inline]
pub fn distance(a: &na::Point2<f32>, b: &na::Point2<f32>) -> f32 {
    na::distance(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn cosine_of_parallel_and_orthogonal() {
        let a = array![0.6f32, 0.8, 0.0];
        let b = array![3.0f32, 4.0, 0.0];
        let c = array![0.0f32, 0.0, 2.0];

        assert_relative_eq!(cosine_similarity(a.view(), b.view()).unwrap(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(cosine_similarity(a.view(), c.view()).unwrap(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(
            cosine_similarity(a.view(), b.mapv(|x| -x).view()).unwrap(),
            -1.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn cosine_rejects_mismatch_and_zero() {
        let a = array![1.0f32, 0.0];
        let b = array![1.0f32, 0.0, 0.0];
        let z = array![0.0f32, 0.0];

        assert!(cosine_similarity(a.view(), b.view()).is_none());
        assert!(cosine_similarity(a.view(), z.view()).is_none());
    }

    #[test]
    fn normalize() {
        let v = l2_normalize(array![3.0f32, 4.0]).unwrap();
        assert_relative_eq!(v[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(v[1], 0.8, epsilon = 1e-6);

        assert!(l2_normalize(array![0.0f32, 0.0]).is_none());
    }

    #[test]
    fn pixel_distance() {
        let d = distance(&na::Point2::new(100.0, 100.0), &na::Point2::new(105.0, 105.0));
        assert_relative_eq!(d, 50.0f32.sqrt(), epsilon = 1e-5);
    }
}
