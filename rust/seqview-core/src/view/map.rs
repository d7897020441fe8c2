// rust/seqview-core/src/view/map.rs

use std::fmt;

use super::View;
use crate::error::{Result, SeqError};

/// Element-wise transform of an upstream view, evaluated on every access.
#[derive(Clone)]
pub struct Map<V, F> {
    upstream: V,
    f: F,
}

impl<V, F> Map<V, F> {
    pub fn new(upstream: V, f: F) -> Self {
        Self { upstream, f }
    }

    pub fn upstream(&self) -> &V {
        &self.upstream
    }
}

impl<V, F, U> View for Map<V, F>
where
    V: View,
    F: Fn(V::Item) -> U + Send + Sync,
{
    type Item = U;

    fn len(&self) -> usize {
        self.upstream.len()
    }

    fn get(&self, index: usize) -> Result<U> {
        let item = self.upstream.get(index)?;
        Ok((self.f)(item))
    }
}

impl<V: fmt::Debug, F> fmt::Debug for Map<V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map").field("upstream", &self.upstream).finish()
    }
}

/// Like [`Map`], for transforms that can fail.
///
/// A failure at index `i` surfaces as [`SeqError::Transform`] carrying `i`
/// and the transform's error. Failures of the upstream view pass through
/// untouched.
#[derive(Clone)]
pub struct TryMap<V, F> {
    upstream: V,
    f: F,
}

impl<V, F> TryMap<V, F> {
    pub fn new(upstream: V, f: F) -> Self {
        Self { upstream, f }
    }
}

impl<V, F, U, E> View for TryMap<V, F>
where
    V: View,
    F: Fn(V::Item) -> std::result::Result<U, E> + Send + Sync,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Item = U;

    fn len(&self) -> usize {
        self.upstream.len()
    }

    fn get(&self, index: usize) -> Result<U> {
        let item = self.upstream.get(index)?;
        (self.f)(item).map_err(|e| SeqError::transform(index, e))
    }
}

impl<V: fmt::Debug, F> fmt::Debug for TryMap<V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TryMap").field("upstream", &self.upstream).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::view::{from_fn, ViewExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_map_matches_function_of_source() {
        let source = vec![3, 1, 4, 1, 5];
        let f = |x: i32| x * x - 1;
        let mapped = source.clone().map(f);

        assert_eq!(mapped.len(), source.len());
        for (i, x) in source.iter().enumerate() {
            assert_eq!(mapped.get(i).unwrap(), f(*x));
        }
    }

    #[test]
    fn test_map_is_lazy_and_uncached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mapped = from_fn(10, |i| i).map(move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            x * 2
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(mapped.get(4).unwrap(), 8);
        assert_eq!(mapped.get(4).unwrap(), 8);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_map_out_of_range_skips_transform() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mapped = from_fn(2, |i| i).map(move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            x
        });

        assert_eq!(mapped.get(2).unwrap_err().kind(), ErrorKind::Index);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_try_map_wraps_failure_with_index() {
        let parsed = vec!["1", "2", "x", "4"].try_map(|s: &str| s.parse::<u32>());

        assert_eq!(parsed.get(1).unwrap(), 2);
        let err = parsed.get(2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transform);
        assert_eq!(err.index(), Some(2));
    }

    #[test]
    fn test_try_map_passes_upstream_errors_through() {
        let inner = from_fn(3, |i| i).try_map(|x| {
            if x == 1 {
                Err("bad record")
            } else {
                Ok(x)
            }
        });
        let outer = inner.try_map(|x| Ok::<_, std::io::Error>(x + 1));

        let err = outer.get(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transform);
        assert!(err.to_string().contains("bad record"));
    }
}
