//! Per-compression-event cache descriptor.
//!
//! The cache manager stores keys and values flattened as
//! `[batch * num_key_value_heads, seq_len, head_dim]`. The scorer reads them
//! through the canonical `[batch, num_key_value_heads, seq_len, head_dim]` view.

use ndarray::{ArrayView3, CowArray, Ix4};
use serde::{Deserialize, Serialize};

use crate::error::{PressError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Batch size.
    pub bsz: usize,

    /// Number of key/value heads per layer.
    pub num_key_value_heads: usize,

    /// Currently stored length of every physical head.
    pub head_lens: Vec<usize>,
}

impl CacheMetadata {
    pub fn new(bsz: usize, num_key_value_heads: usize, head_lens: Vec<usize>) -> Self {
        Self {
            bsz,
            num_key_value_heads,
            head_lens,
        }
    }

    /// Metadata of an untouched cache: every head holds `seq_len` entries.
    pub fn uniform(bsz: usize, num_key_value_heads: usize, seq_len: usize) -> Self {
        Self::new(bsz, num_key_value_heads, vec![seq_len; bsz * num_key_value_heads])
    }

    /// The shared stored length, or `UnsupportedRecompression` if heads differ.
    ///
    /// Differing lengths mean a previous compression already pruned heads
    /// unevenly; the window and floor logic only hold for an untouched cache.
    pub fn uniform_len(&self) -> Result<usize> {
        let first = self.head_lens.first().copied().ok_or(PressError::MissingMetadata)?;
        if self.head_lens.iter().any(|&len| len != first) {
            return Err(PressError::UnsupportedRecompression {
                head_lens: self.head_lens.clone(),
            });
        }
        Ok(first)
    }

    /// Reshape a flattened key or value tensor into the canonical 4-D view.
    ///
    /// Standard-layout tensors are borrowed; sliced or transposed ones are
    /// copied into standard layout first.
    pub fn view_4d<'a, T: Clone>(&self, kv: ArrayView3<'a, T>) -> Result<CowArray<'a, T, Ix4>> {
        let seq_len = self.uniform_len()?;
        let (rows, positions, head_dim) = kv.dim();
        let expected = [self.bsz * self.num_key_value_heads, seq_len, head_dim];
        if [rows, positions, head_dim] != expected {
            return Err(PressError::ShapeMismatch {
                what: "cached key/value tensor",
                expected: expected.to_vec(),
                actual: vec![rows, positions, head_dim],
            });
        }

        let shape = (self.bsz, self.num_key_value_heads, seq_len, head_dim);
        let mismatch = |_| PressError::ShapeMismatch {
            what: "cached key/value layout",
            expected: expected.to_vec(),
            actual: vec![rows, positions, head_dim],
        };
        if kv.is_standard_layout() {
            kv.into_shape_with_order(shape).map(CowArray::from).map_err(mismatch)
        } else {
            kv.as_standard_layout()
                .into_owned()
                .into_shape_with_order(shape)
                .map(CowArray::from)
                .map_err(mismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_uniform_len() {
        assert_eq!(CacheMetadata::uniform(2, 4, 128).uniform_len(), Ok(128));
    }

    #[test]
    fn test_uneven_heads_rejected() {
        let meta = CacheMetadata::new(1, 2, vec![10, 7]);
        assert_eq!(
            meta.uniform_len(),
            Err(PressError::UnsupportedRecompression {
                head_lens: vec![10, 7]
            })
        );
    }

    #[test]
    fn test_empty_head_lens_is_missing_metadata() {
        let meta = CacheMetadata::new(1, 1, vec![]);
        assert_eq!(meta.uniform_len(), Err(PressError::MissingMetadata));
    }

    #[test]
    fn test_view_4d() {
        let keys = Array3::from_shape_fn((4, 3, 2), |(r, t, d)| (r * 100 + t * 10 + d) as f32);
        let meta = CacheMetadata::uniform(2, 2, 3);

        let view = meta.view_4d(keys.view()).unwrap();
        assert_eq!(view.dim(), (2, 2, 3, 2));
        // row 3 = batch 1, head 1
        assert_eq!(view[[1, 1, 2, 1]], 321.0);
    }

    #[test]
    fn test_view_4d_copies_non_standard_layout() {
        // Stored as [position, row, dim] and viewed as [row, position, dim].
        let stored = Array3::from_shape_fn((3, 4, 2), |(t, r, d)| (r * 100 + t * 10 + d) as f32);
        let keys = stored.view().permuted_axes([1, 0, 2]);
        assert!(!keys.is_standard_layout());

        let view = CacheMetadata::uniform(2, 2, 3).view_4d(keys).unwrap();
        assert!(view.is_owned());
        assert_eq!(view.dim(), (2, 2, 3, 2));
        assert_eq!(view[[1, 1, 2, 1]], 321.0);
        assert_eq!(view[[0, 1, 0, 0]], 100.0);
    }

    #[test]
    fn test_view_4d_shape_mismatch() {
        let keys = Array3::<f32>::zeros((3, 3, 2));
        let meta = CacheMetadata::uniform(2, 2, 3);
        assert!(matches!(
            meta.view_4d(keys.view()),
            Err(PressError::ShapeMismatch { .. })
        ));
    }
}
