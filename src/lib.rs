//! Duplicate call suppression.
//!
//! A [`Group`] makes sure that, for any set of overlapping calls sharing a key,
//! the work runs once and every caller receives the same result, value or
//! error. Call records are recycled once the last caller lets go of them, so
//! high key churn does not allocate per call.
//!
//! # Examples
//!
//! ```
//! use singleflight::Group;
//!
//! let group = Group::<String, u32, ()>::new();
//! let (res, shared) = group.work("answer", || Ok(42));
//! assert_eq!(res, Ok(42));
//! assert!(!shared);
//! ```
mod call;
mod group;
mod pool;
mod types;

pub use group::Group;
pub use types::{Options, SharedError};
