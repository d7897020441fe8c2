// rust/seqview-core/src/view/concat.rs

use super::View;
use crate::error::{check_index, Result};

/// Several views of the same item type, one after the other.
///
/// A global index is translated to `(part, local index)` by binary search over
/// the cumulative end offsets of the parts.
#[derive(Debug, Clone)]
pub struct Concat<V> {
    parts: Vec<V>,
    /// `ends[k]` is the exclusive global end of part `k`.
    ends: Vec<usize>,
}

/// Stitches `parts` into a single view.
pub fn concatenate<V: View>(parts: Vec<V>) -> Concat<V> {
    Concat::new(parts)
}

impl<V: View> Concat<V> {
    pub fn new(parts: Vec<V>) -> Self {
        let ends = parts
            .iter()
            .scan(0usize, |total, part| {
                *total += part.len();
                Some(*total)
            })
            .collect();
        Self { parts, ends }
    }

    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    /// Maps a global index to the owning part and the index inside it.
    pub fn locate(&self, index: usize) -> Result<(usize, usize)> {
        check_index(index, self.len())?;
        // First part whose end lies past `index`; skips empty parts.
        let part = self.ends.partition_point(|&end| end <= index);
        let start = self.ends[part] - self.parts[part].len();
        Ok((part, index - start))
    }
}

impl<V: View> View for Concat<V> {
    type Item = V::Item;

    fn len(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    fn get(&self, index: usize) -> Result<V::Item> {
        let (part, local) = self.locate(index)?;
        self.parts[part].get(local)
    }
}
