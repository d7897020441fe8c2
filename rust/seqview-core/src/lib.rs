// rust/seqview-core/src/lib.rs

//! Sequence views - Core Library
//!
//! Lazy, randomly indexable views over datasets too large to materialize,
//! a bounded LRU cache with single-flight computation, and a prefetch engine
//! that evaluates a view ahead of its consumer on worker threads or forked
//! worker processes.

pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use config::{BatchConfig, CacheConfig, ExecutionMode, PrefetchConfig, SeqConfig};
pub use error::{ErrorKind, RemoteError, Result, SeqError};

pub mod view;
pub use view::{
    concatenate, from_fn, Batch, Collate, Concat, Cycle, FromFn, Gather, Map, Repeat, TryMap,
    Unbatch, View, ViewExt, ViewIter, Zip,
};

pub mod cache;
pub use cache::{Cache, CacheStats};

pub mod prefetch;
pub use prefetch::{Prefetch, PrefetchBuilder, Session, SessionState};
