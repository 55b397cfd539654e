//! Distance kernels over `wide::f32x8` lanes.
//!
//! Each kernel walks both inputs in chunks of eight, accumulates in vector
//! registers, then folds the leftover tail in plain `f32`.

use wide::f32x8;

const LANES: usize = 8;

#[inline]
fn load(chunk: &[f32]) -> f32x8 {
    let mut lanes = [0.0f32; LANES];
    lanes.copy_from_slice(chunk);
    f32x8::new(lanes)
}

#[inline]
fn reduce(acc: f32x8) -> f32 {
    acc.to_array().into_iter().sum()
}

/// Fold two equal-length slices pairwise: `lane` runs on full chunks, `tail`
/// on the remainder.
#[inline]
fn fold_pairs(
    a: &[f32],
    b: &[f32],
    lane: impl Fn(f32x8, f32x8) -> f32x8,
    tail: impl Fn(f32, f32) -> f32,
) -> f32 {
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let rest: f32 = a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .map(|(&x, &y)| tail(x, y))
        .sum();

    let acc = a_chunks
        .zip(b_chunks)
        .fold(f32x8::ZERO, |acc, (x, y)| acc + lane(load(x), load(y)));
    reduce(acc) + rest
}

/// Squared L2 distance.
#[inline]
#[must_use]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "length mismatch in squared euclidean");
    fold_pairs(
        a,
        b,
        |x, y| {
            let d = x - y;
            d * d
        },
        |x, y| (x - y) * (x - y),
    )
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
    fold_pairs(a, b, |x, y| x * y, |x, y| x * y)
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
///
/// The dot product and both squared norms share one pass over the input.
#[inline]
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "length mismatch in cosine");

    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let (mut ab, mut aa, mut bb) = (0.0f32, 0.0f32, 0.0f32);
    for (&x, &y) in a_chunks.remainder().iter().zip(b_chunks.remainder()) {
        ab += x * y;
        aa += x * x;
        bb += y * y;
    }

    let (mut vab, mut vaa, mut vbb) = (f32x8::ZERO, f32x8::ZERO, f32x8::ZERO);
    for (x, y) in a_chunks.zip(b_chunks) {
        let (x, y) = (load(x), load(y));
        vab += x * y;
        vaa += x * x;
        vbb += y * y;
    }
    ab += reduce(vab);
    aa += reduce(vaa);
    bb += reduce(vbb);

    let norms = (aa * bb).sqrt();
    if norms == 0.0 {
        0.0
    } else {
        ab / norms
    }
}

/// `1 - cosine_similarity(a, b)`.
#[inline]
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
