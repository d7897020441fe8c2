// rust/seqview-core/src/view/mod.rs

//! Lazy, randomly indexable sequence views.
//!
//! A [`View`] reports a length and produces the item at any index on demand.
//! Combinators wrap one or more upstream views without evaluating anything at
//! construction time, so a pipeline over a dataset far larger than memory
//! costs nothing until items are requested.
//!
//! # Example
//!
//! ```
//! use seqview_core::view::{from_fn, concatenate, View, ViewExt};
//!
//! let squares = from_fn(4, |i| i * i);
//! let labels = squares.map(|x| format!("#{x}"));
//! assert_eq!(labels.get(3).unwrap(), "#9");
//!
//! let both = concatenate(vec![vec![0, 1], vec![10, 11, 12]]);
//! assert_eq!(both.len(), 5);
//! assert_eq!(both.get(2).unwrap(), 10);
//! ```

mod batch;
mod collate;
mod concat;
mod map;
mod reindex;

use std::fmt;
use std::sync::Arc;

pub use batch::{Batch, Unbatch};
pub use collate::{Collate, Zip};
pub use concat::{concatenate, Concat};
pub use map::{Map, TryMap};
pub use reindex::{Cycle, Gather};

use crate::cache::Cache;
use crate::error::{check_index, Result};
use crate::prefetch::PrefetchBuilder;

/// A read-only sequence with random access.
///
/// `len` must be constant for the lifetime of the view. `get` fails with
/// [`SeqError::Index`](crate::SeqError::Index) for indices outside `0..len`.
pub trait View: Send + Sync {
    type Item;

    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<Self::Item>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: View + ?Sized> View for Arc<V> {
    type Item = V::Item;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Self::Item> {
        (**self).get(index)
    }
}

impl<V: View + ?Sized> View for Box<V> {
    type Item = V::Item;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Self::Item> {
        (**self).get(index)
    }
}

impl<V: View + ?Sized> View for &V {
    type Item = V::Item;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Self::Item> {
        (**self).get(index)
    }
}

impl<T: Clone + Send + Sync> View for Vec<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn get(&self, index: usize) -> Result<T> {
        check_index(index, self.as_slice().len())?;
        Ok(self[index].clone())
    }
}

/// A view computing each item from its index.
#[derive(Clone)]
pub struct FromFn<F> {
    len: usize,
    f: F,
}

/// Creates a view of `len` items where item `i` is `f(i)`.
pub fn from_fn<T, F>(len: usize, f: F) -> FromFn<F>
where
    F: Fn(usize) -> T + Send + Sync,
{
    FromFn { len, f }
}

impl<T, F> View for FromFn<F>
where
    F: Fn(usize) -> T + Send + Sync,
{
    type Item = T;

    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<T> {
        check_index(index, self.len)?;
        Ok((self.f)(index))
    }
}

impl<F> fmt::Debug for FromFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFn").field("len", &self.len).finish()
    }
}

/// The same value `times` times.
#[derive(Debug, Clone)]
pub struct Repeat<T> {
    value: T,
    times: usize,
}

impl<T> Repeat<T> {
    pub fn new(value: T, times: usize) -> Self {
        Self { value, times }
    }
}

impl<T: Clone + Send + Sync> View for Repeat<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.times
    }

    fn get(&self, index: usize) -> Result<T> {
        check_index(index, self.times)?;
        Ok(self.value.clone())
    }
}

/// Sequential, synchronous iteration over a view.
pub struct ViewIter<'a, V: ?Sized> {
    view: &'a V,
    next: usize,
    end: usize,
}

impl<V: View + ?Sized> Iterator for ViewIter<'_, V> {
    type Item = Result<V::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.view.get(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl<V: View + ?Sized> ExactSizeIterator for ViewIter<'_, V> {}

/// Fluent constructors for the combinators.
pub trait ViewExt: View + Sized {
    /// Applies `f` to every item on access.
    fn map<U, F>(self, f: F) -> Map<Self, F>
    where
        F: Fn(Self::Item) -> U + Send + Sync,
    {
        Map::new(self, f)
    }

    /// Applies a fallible `f` to every item on access; its errors become
    /// [`SeqError::Transform`](crate::SeqError::Transform).
    fn try_map<U, E, F>(self, f: F) -> TryMap<Self, F>
    where
        F: Fn(Self::Item) -> std::result::Result<U, E> + Send + Sync,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        TryMap::new(self, f)
    }

    /// Keeps the `capacity` most recently used items in memory.
    fn cached(self, capacity: usize) -> Result<Cache<Self>>
    where
        Self::Item: Clone,
    {
        Cache::new(self, capacity)
    }

    fn batch(self, batch_size: usize, drop_last: bool) -> Result<Batch<Self>> {
        Batch::new(self, batch_size, drop_last)
    }

    fn unbatch<T>(self, batch_size: usize) -> Result<Unbatch<Self, T>>
    where
        Self: View<Item = Vec<T>>,
    {
        Unbatch::new(self, batch_size)
    }

    fn gather(self, indices: impl Into<Arc<[usize]>>) -> Result<Gather<Self>> {
        Gather::new(self, indices)
    }

    fn cycle(self, len: usize) -> Result<Cycle<Self>> {
        Cycle::new(self, len)
    }

    fn zip<B: View>(self, other: B) -> Result<Zip<Self, B>> {
        Zip::new(self, other)
    }

    /// Starts configuring a [`Prefetch`](crate::Prefetch) engine over this view.
    fn prefetch(self) -> PrefetchBuilder<Self>
    where
        Self: 'static,
    {
        PrefetchBuilder::new(self)
    }

    /// Evaluates items one at a time, in order, on the calling thread.
    fn items(&self) -> ViewIter<'_, Self> {
        ViewIter {
            view: self,
            next: 0,
            end: self.len(),
        }
    }

    /// Evaluates every item in order, stopping at the first error.
    fn collect_items(&self) -> Result<Vec<Self::Item>> {
        self.items().collect()
    }
}

impl<V: View> ViewExt for V {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_vec_view() {
        let v = vec!["a", "b", "c"];
        assert_eq!(View::len(&v), 3);
        assert_eq!(View::get(&v, 1).unwrap(), "b");
        assert_eq!(View::get(&v, 3).unwrap_err().kind(), ErrorKind::Index);
    }

    #[test]
    fn test_from_fn_bounds() {
        let v = from_fn(5, |i| i + 1);
        assert_eq!(v.get(4).unwrap(), 5);
        let err = v.get(5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Index);
        assert_eq!(err.index(), Some(5));
    }

    #[test]
    fn test_repeat() {
        let v = Repeat::new(String::from("x"), 3);
        assert_eq!(v.collect_items().unwrap(), vec!["x", "x", "x"]);
        assert!(v.get(3).is_err());
        assert!(Repeat::new(1u8, 0).is_empty());
    }

    #[test]
    fn test_shared_upstream() {
        let source = Arc::new(from_fn(3, |i| i * 10));
        let plus = source.clone().map(|x| x + 1);
        let minus = source.clone().map(|x| x as i64 - 1);
        assert_eq!(plus.get(2).unwrap(), 21);
        assert_eq!(minus.get(0).unwrap(), -1);
        assert_eq!(source.len(), 3);
    }

    #[test]
    fn test_boxed_dyn_view() {
        let views: Vec<Box<dyn View<Item = usize>>> = vec![
            Box::new(from_fn(2, |i| i)),
            Box::new(vec![7usize, 8, 9]),
        ];
        let all = concatenate(views);
        assert_eq!(all.collect_items().unwrap(), vec![0, 1, 7, 8, 9]);
    }

    #[test]
    fn test_vec_keeps_slice_iter() {
        let v = vec![4u32, 5, 6];
        let total: u32 = v.iter().copied().sum();
        assert_eq!(total, 15);
        assert_eq!(v.items().map(|r| r.unwrap()).sum::<u32>(), 15);
    }

    #[test]
    fn test_iter_size_hint() {
        let v = from_fn(3, |i| i);
        let mut it = v.items();
        assert_eq!(it.len(), 3);
        it.next();
        assert_eq!(it.len(), 2);
    }
}
