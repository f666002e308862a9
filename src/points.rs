use crate::HsneError;

/// Borrowed, row-major view of `len` points with `dim` coordinates each.
///
/// The caller keeps ownership of the buffer; construction only reads it.
#[derive(Debug, Clone, Copy)]
pub struct PointSet<'a> {
    data: &'a [f32],
    dim: usize,
}

impl<'a> PointSet<'a> {
    /// Wrap a flat buffer, checking that it is non-empty, rectangular and finite.
    pub fn new(data: &'a [f32], dim: usize) -> Result<Self, HsneError> {
        if dim == 0 {
            return Err(HsneError::InputShape(
                "dimensionality must be positive".to_string(),
            ));
        }
        if data.is_empty() {
            return Err(HsneError::InputShape("point set is empty".to_string()));
        }
        if data.len() % dim != 0 {
            return Err(HsneError::InputShape(format!(
                "buffer of {} values is not a multiple of dimensionality {dim}",
                data.len()
            )));
        }
        if data.len() / dim > u32::MAX as usize {
            return Err(HsneError::InputShape(
                "point count exceeds u32 indexing".to_string(),
            ));
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            return Err(HsneError::InputShape(format!(
                "non-finite value in point {} (dimension {})",
                pos / dim,
                pos % dim
            )));
        }
        Ok(Self { data, dim })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Coordinates of point `idx`.
    #[inline]
    pub fn point(&self, idx: usize) -> &'a [f32] {
        &self.data[idx * self.dim..(idx + 1) * self.dim]
    }

    /// The underlying row-major buffer.
    pub fn as_slice(&self) -> &'a [f32] {
        self.data
    }
}
