// rust/seqview-core/src/view/reindex.rs

use std::sync::Arc;

use super::View;
use crate::error::{check_index, Result, SeqError};

/// Reorders or subsets a view through an index table.
#[derive(Debug, Clone)]
pub struct Gather<V> {
    upstream: V,
    indices: Arc<[usize]>,
}

impl<V: View> Gather<V> {
    /// # Errors
    ///
    /// Returns a configuration error if any index is out of range for
    /// `upstream`.
    pub fn new(upstream: V, indices: impl Into<Arc<[usize]>>) -> Result<Self> {
        let indices = indices.into();
        let len = upstream.len();
        if let Some(bad) = indices.iter().find(|&&i| i >= len) {
            return Err(SeqError::config(format!(
                "gather index {bad} out of range for view of length {len}"
            )));
        }
        Ok(Self { upstream, indices })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Gathers again from the same upstream, composing the index tables so
    /// lookups stay one level deep.
    pub fn regather(&self, indices: &[usize]) -> Result<Self>
    where
        V: Clone,
    {
        let composed = indices
            .iter()
            .map(|&i| {
                check_index(i, self.indices.len())?;
                Ok(self.indices[i])
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            upstream: self.upstream.clone(),
            indices: composed.into(),
        })
    }
}

impl<V: View> View for Gather<V> {
    type Item = V::Item;

    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get(&self, index: usize) -> Result<V::Item> {
        check_index(index, self.indices.len())?;
        self.upstream.get(self.indices[index])
    }
}

/// Repeats an upstream view end to end until `len` items.
#[derive(Debug, Clone)]
pub struct Cycle<V> {
    upstream: V,
    len: usize,
}

impl<V: View> Cycle<V> {
    pub fn new(upstream: V, len: usize) -> Result<Self> {
        if len > 0 && upstream.is_empty() {
            return Err(SeqError::config("cannot cycle an empty view"));
        }
        Ok(Self { upstream, len })
    }
}

impl<V: View> View for Cycle<V> {
    type Item = V::Item;

    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<V::Item> {
        check_index(index, self.len)?;
        self.upstream.get(index % self.upstream.len())
    }
}
