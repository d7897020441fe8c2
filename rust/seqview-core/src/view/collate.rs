// rust/seqview-core/src/view/collate.rs

use super::View;
use crate::error::{Result, SeqError};

/// Zips `k` equal-length views; item `i` holds every upstream's item `i`.
#[derive(Debug, Clone)]
pub struct Collate<V> {
    views: Vec<V>,
    len: usize,
}

impl<V: View> Collate<V> {
    /// # Errors
    ///
    /// Returns a configuration error when `views` is empty or the lengths
    /// differ.
    pub fn new(views: Vec<V>) -> Result<Self> {
        let len = match views.first() {
            Some(first) => first.len(),
            None => return Err(SeqError::config("collate requires at least one view")),
        };
        if let Some((k, bad)) = views.iter().enumerate().find(|(_, v)| v.len() != len) {
            return Err(SeqError::config(format!(
                "collate requires views of equal length: view 0 has {} items, view {} has {}",
                len,
                k,
                bad.len()
            )));
        }
        Ok(Self { views, len })
    }

    pub fn width(&self) -> usize {
        self.views.len()
    }
}

impl<V: View> View for Collate<V> {
    type Item = Vec<V::Item>;

    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<Vec<V::Item>> {
        self.views.iter().map(|v| v.get(index)).collect()
    }
}

/// Pairs items of two equal-length views of possibly different item types.
#[derive(Debug, Clone)]
pub struct Zip<A, B> {
    a: A,
    b: B,
}

impl<A: View, B: View> Zip<A, B> {
    pub fn new(a: A, b: B) -> Result<Self> {
        if a.len() != b.len() {
            return Err(SeqError::config(format!(
                "zip requires views of equal length, got {} and {}",
                a.len(),
                b.len()
            )));
        }
        Ok(Self { a, b })
    }
}

impl<A: View, B: View> View for Zip<A, B> {
    type Item = (A::Item, B::Item);

    fn len(&self) -> usize {
        self.a.len()
    }

    fn get(&self, index: usize) -> Result<Self::Item> {
        Ok((self.a.get(index)?, self.b.get(index)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::view::{from_fn, ViewExt};

    #[test]
    fn test_collate_length_mismatch() {
        let err = Collate::new(vec![vec![1, 2, 3], vec![1, 2]]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("view 1 has 2"));
    }

    #[test]
    fn test_collate_empty() {
        let err = Collate::<Vec<u8>>::new(vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_collate_items() {
        let a = vec![1, 2, 3];
        let b = vec![4, 5, 6];
        let c = Collate::new(vec![a.clone(), b.clone()]).unwrap();

        assert_eq!(c.len(), 3);
        assert_eq!(c.width(), 2);
        for i in 0..3 {
            assert_eq!(c.get(i).unwrap(), vec![a[i], b[i]]);
        }
        assert_eq!(c.get(3).unwrap_err().kind(), ErrorKind::Index);
    }

    #[test]
    fn test_zip_pairs() {
        let names = vec!["a", "b"];
        let sizes = from_fn(2, |i| i * 100);
        let z = names.zip(sizes).unwrap();

        assert_eq!(z.get(1).unwrap(), ("b", 100));
        assert_eq!(z.collect_items().unwrap(), vec![("a", 0), ("b", 100)]);
    }

    #[test]
    fn test_zip_length_mismatch() {
        let err = Zip::new(from_fn(2, |i| i), from_fn(3, |i| i)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
