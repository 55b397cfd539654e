//! Plain iterator kernels, selected by the `scalar` feature or when `simd`
//! is off.

/// Squared L2 distance.
#[inline]
#[must_use]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "length mismatch in squared euclidean");
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// L2 distance.
#[inline]
#[must_use]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance_squared(a, b).sqrt()
}

/// Inner product of `a` and `b`.
#[inline]
#[must_use]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "length mismatch in dot product");
    a.iter().zip(b).fold(0.0, |acc, (x, y)| x.mul_add(*y, acc))
}

/// `|v|^2`.
#[inline]
#[must_use]
pub fn sum_of_squares(v: &[f32]) -> f32 {
    dot_product(v, v)
}

/// `|v|`.
#[inline]
#[must_use]
pub fn l2_norm(v: &[f32]) -> f32 {
    sum_of_squares(v).sqrt()
}

/// Cosine of the angle between `a` and `b`; zero when either has no length.
#[inline]
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norms = l2_norm(a) * l2_norm(b);
    if norms == 0.0 {
        0.0
    } else {
        dot_product(a, b) / norms
    }
}

/// `1 - cosine_similarity(a, b)`.
#[inline]
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
