/// Compute the squared Euclidean distance between two vectors.
#[inline]
pub fn l2_distance_sqr(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut acc = [0.0f32; 4];
    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder().iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum();

    for (ca, cb) in chunks_a.zip(chunks_b) {
        for lane in 0..4 {
            let diff = ca[lane] - cb[lane];
            acc[lane] += diff * diff;
        }
    }

    (acc[0] + acc[1]) + (acc[2] + acc[3]) + tail
}

/// Per-dimension mean and variance of the rows selected by `ids`.
///
/// Accumulates in f64; `rows` is a row-major matrix with `dim` columns.
pub fn mean_and_variance(rows: &[f32], dim: usize, ids: &[u32]) -> (Vec<f64>, Vec<f64>) {
    let mut mean = vec![0.0f64; dim];
    let mut var = vec![0.0f64; dim];
    if ids.is_empty() {
        return (mean, var);
    }

    for &id in ids {
        let row = &rows[id as usize * dim..(id as usize + 1) * dim];
        for (m, &v) in mean.iter_mut().zip(row.iter()) {
            *m += v as f64;
        }
    }
    let inv = 1.0 / ids.len() as f64;
    for m in mean.iter_mut() {
        *m *= inv;
    }

    for &id in ids {
        let row = &rows[id as usize * dim..(id as usize + 1) * dim];
        for ((s, &v), &m) in var.iter_mut().zip(row.iter()).zip(mean.iter()) {
            let diff = v as f64 - m;
            *s += diff * diff;
        }
    }
    for s in var.iter_mut() {
        *s *= inv;
    }

    (mean, var)
}
