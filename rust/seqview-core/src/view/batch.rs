// rust/seqview-core/src/view/batch.rs

use std::marker::PhantomData;

use super::View;
use crate::config::BatchConfig;
use crate::error::{check_index, Result, SeqError};

/// Groups consecutive items into `Vec`s of `batch_size`.
///
/// Without `drop_last`, a final partial group holds the remaining
/// `len % batch_size` items.
#[derive(Debug, Clone)]
pub struct Batch<V> {
    upstream: V,
    batch_size: usize,
    drop_last: bool,
}

impl<V: View> Batch<V> {
    pub fn new(upstream: V, batch_size: usize, drop_last: bool) -> Result<Self> {
        if batch_size == 0 {
            return Err(SeqError::config("batch_size must be greater than 0"));
        }
        Ok(Self {
            upstream,
            batch_size,
            drop_last,
        })
    }

    pub fn from_config(upstream: V, config: &BatchConfig) -> Result<Self> {
        config.validate()?;
        Self::new(upstream, config.batch_size, config.drop_last)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Size of the last group, or `None` for an empty view.
    pub fn last_batch_size(&self) -> Option<usize> {
        let n = self.upstream.len();
        match self.len() {
            0 => None,
            groups if self.drop_last || n % self.batch_size == 0 => {
                debug_assert!(groups * self.batch_size <= n);
                Some(self.batch_size)
            }
            _ => Some(n % self.batch_size),
        }
    }
}

impl<V: View> View for Batch<V> {
    type Item = Vec<V::Item>;

    fn len(&self) -> usize {
        let n = self.upstream.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    fn get(&self, index: usize) -> Result<Vec<V::Item>> {
        check_index(index, self.len())?;
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.upstream.len());
        (start..end).map(|i| self.upstream.get(i)).collect()
    }
}

/// Flattens a view of groups back into a view of items.
///
/// Every group is expected to hold exactly `batch_size` items except the last,
/// which holds `last_batch_size`. A group that does not match its declared
/// size fails with [`SeqError::Shape`] when one of its items is requested.
#[derive(Debug, Clone)]
pub struct Unbatch<V, T> {
    upstream: V,
    batch_size: usize,
    last_batch_size: usize,
    _item: PhantomData<fn() -> T>,
}

impl<V, T> Unbatch<V, T>
where
    V: View<Item = Vec<T>>,
{
    pub fn new(upstream: V, batch_size: usize) -> Result<Self> {
        Self::with_last_batch_size(upstream, batch_size, batch_size)
    }

    pub fn with_last_batch_size(
        upstream: V,
        batch_size: usize,
        last_batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(SeqError::config("batch_size must be greater than 0"));
        }
        if last_batch_size == 0 || last_batch_size > batch_size {
            return Err(SeqError::config(format!(
                "last_batch_size must be in 1..={batch_size}, got {last_batch_size}"
            )));
        }
        Ok(Self {
            upstream,
            batch_size,
            last_batch_size,
            _item: PhantomData,
        })
    }

    fn expected_group_size(&self, group: usize) -> usize {
        if group + 1 == self.upstream.len() {
            self.last_batch_size
        } else {
            self.batch_size
        }
    }
}

impl<V, T> View for Unbatch<V, T>
where
    V: View<Item = Vec<T>>,
{
    type Item = T;

    fn len(&self) -> usize {
        match self.upstream.len() {
            0 => 0,
            groups => (groups - 1) * self.batch_size + self.last_batch_size,
        }
    }

    fn get(&self, index: usize) -> Result<T> {
        check_index(index, self.len())?;
        let group = index / self.batch_size;
        let offset = index % self.batch_size;

        let items = self.upstream.get(group)?;
        let expected = self.expected_group_size(group);
        if items.len() != expected {
            return Err(SeqError::shape(group, expected, items.len()));
        }
        items
            .into_iter()
            .nth(offset)
            .ok_or_else(|| SeqError::shape(group, expected, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::view::{from_fn, ViewExt};

    #[test]
    fn test_batch_lengths() {
        let exact = from_fn(12, |i| i).batch(4, false).unwrap();
        assert_eq!(exact.len(), 3);
        assert_eq!(exact.last_batch_size(), Some(4));

        let partial = from_fn(10, |i| i).batch(4, false).unwrap();
        assert_eq!(partial.len(), 3);
        assert_eq!(partial.get(2).unwrap(), vec![8, 9]);
        assert_eq!(partial.last_batch_size(), Some(2));

        let dropped = from_fn(10, |i| i).batch(4, true).unwrap();
        assert_eq!(dropped.len(), 2);
        assert_eq!(dropped.get(1).unwrap(), vec![4, 5, 6, 7]);
        assert!(dropped.get(2).is_err());

        let empty = from_fn(0, |i| i).batch(4, false).unwrap();
        assert_eq!(empty.len(), 0);
        assert_eq!(empty.last_batch_size(), None);
    }

    #[test]
    fn test_batch_rejects_zero() {
        let err = from_fn(3, |i| i).batch(0, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_unbatch_inverts_batch() {
        let source: Vec<u32> = (0..24).map(|i| i * 3).collect();
        let flat = source.clone().batch(6, false).unwrap().unbatch(6).unwrap();

        assert_eq!(flat.len(), source.len());
        assert_eq!(flat.collect_items().unwrap(), source);
    }

    #[test]
    fn test_unbatch_with_partial_last_group() {
        let source: Vec<u32> = (0..10).collect();
        let groups = source.clone().batch(4, false).unwrap();
        let flat = Unbatch::with_last_batch_size(groups, 4, 2).unwrap();

        assert_eq!(flat.len(), 10);
        assert_eq!(flat.collect_items().unwrap(), source);
    }

    #[test]
    fn test_unbatch_reports_misdeclared_group() {
        // The last group really holds 2 items but is declared full.
        let groups = from_fn(10, |i| i).batch(4, false).unwrap();
        let flat = groups.unbatch(4).unwrap();

        assert_eq!(flat.len(), 12);
        assert_eq!(flat.get(7).unwrap(), 7);
        let err = flat.get(8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
        assert!(matches!(
            err,
            SeqError::Shape { group: 2, expected: 4, actual: 2 }
        ));
    }

    #[test]
    fn test_unbatch_config_errors() {
        let groups = vec![vec![1, 2], vec![3, 4]];
        assert!(Unbatch::new(groups.clone(), 0).is_err());
        assert!(Unbatch::with_last_batch_size(groups.clone(), 2, 0).is_err());
        assert!(Unbatch::with_last_batch_size(groups, 2, 3).is_err());
    }

    #[test]
    fn test_batch_from_config() {
        let config = BatchConfig {
            batch_size: 3,
            drop_last: true,
        };
        let batched = Batch::from_config(from_fn(7, |i| i), &config).unwrap();
        assert_eq!(batched.len(), 2);
    }
}
