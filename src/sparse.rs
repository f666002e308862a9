//! Sparse rows and matrices with sorted `(column, weight)` pairs.

use crate::HsneError;

/// One sparse row: unique column indices in ascending order with their weights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseRow {
    entries: Vec<(u32, f32)>,
}

impl SparseRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from arbitrary pairs. Duplicate columns are summed.
    pub fn from_entries(mut entries: Vec<(u32, f32)>) -> Self {
        entries.sort_by_key(|&(col, _)| col);
        let mut merged: Vec<(u32, f32)> = Vec::with_capacity(entries.len());
        for (col, weight) in entries {
            match merged.last_mut() {
                Some(last) if last.0 == col => last.1 += weight,
                _ => merged.push((col, weight)),
            }
        }
        Self { entries: merged }
    }

    /// Build a row from pairs already sorted by strictly increasing column.
    pub(crate) fn from_sorted(entries: Vec<(u32, f32)>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(u32, f32)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.entries.iter().copied()
    }

    /// Weight stored for `col`, if any.
    pub fn get(&self, col: u32) -> Option<f32> {
        self.entries
            .binary_search_by_key(&col, |&(c, _)| c)
            .ok()
            .map(|pos| self.entries[pos].1)
    }

    /// Sum of all weights, accumulated in f64.
    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|&(_, w)| w as f64).sum()
    }

    /// Column with the largest weight; ties go to the lowest column.
    pub fn argmax(&self) -> Option<u32> {
        let mut best: Option<(u32, f32)> = None;
        for &(col, weight) in &self.entries {
            match best {
                Some((_, w)) if weight <= w => {}
                _ => best = Some((col, weight)),
            }
        }
        best.map(|(col, _)| col)
    }
}

/// Row-major sparse matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseMatrix {
    rows: Vec<SparseRow>,
    num_cols: usize,
}

impl SparseMatrix {
    /// Empty matrix with `num_cols` columns and no rows.
    pub fn with_cols(num_cols: usize) -> Self {
        Self {
            rows: Vec::new(),
            num_cols,
        }
    }

    /// Wrap rows, checking every column index against `num_cols`.
    pub fn from_rows(rows: Vec<SparseRow>, num_cols: usize) -> Result<Self, HsneError> {
        for row in &rows {
            if let Some(&(col, _)) = row.entries.last() {
                if col as usize >= num_cols {
                    return Err(HsneError::InputShape(format!(
                        "column {col} out of range for {num_cols} columns"
                    )));
                }
            }
        }
        Ok(Self { rows, num_cols })
    }

    pub(crate) fn from_rows_unchecked(rows: Vec<SparseRow>, num_cols: usize) -> Self {
        Self { rows, num_cols }
    }

    /// Square matrix built from rows over the same index space.
    pub fn square(rows: Vec<SparseRow>) -> Result<Self, HsneError> {
        let n = rows.len();
        Self::from_rows(rows, n)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn row(&self, idx: usize) -> &SparseRow {
        &self.rows[idx]
    }

    pub fn rows(&self) -> &[SparseRow] {
        &self.rows
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(SparseRow::len).sum()
    }

    /// True when every row sums to one within `tolerance`.
    pub fn is_row_stochastic(&self, tolerance: f64) -> bool {
        self.rows
            .iter()
            .all(|row| (row.sum() - 1.0).abs() <= tolerance)
    }
}

/// Normalise a row of non-negative masses, prune and renormalise.
///
/// Entries whose normalised weight is zero or below `threshold` are dropped,
/// and the survivors are rescaled to sum to one. Fails with
/// [`HsneError::DegenerateRow`] when nothing survives or the row has no mass.
pub fn normalize_and_prune(
    row_idx: usize,
    masses: &[(u32, f64)],
    threshold: f32,
) -> Result<SparseRow, HsneError> {
    let degenerate = || HsneError::DegenerateRow {
        row: row_idx,
        threshold,
    };

    let total: f64 = masses.iter().map(|&(_, m)| m).sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(degenerate());
    }

    let threshold = threshold as f64;
    let mut survivors: Vec<(u32, f64)> = masses
        .iter()
        .filter(|&&(_, m)| m > 0.0 && m / total >= threshold)
        .copied()
        .collect();
    if survivors.is_empty() {
        return Err(degenerate());
    }

    let kept: f64 = survivors.iter().map(|&(_, m)| m).sum();
    for entry in survivors.iter_mut() {
        entry.1 /= kept;
    }
    survivors.sort_by_key(|&(col, _)| col);

    Ok(SparseRow::from_sorted(
        survivors
            .into_iter()
            .map(|(col, w)| (col, w as f32))
            .collect(),
    ))
}
