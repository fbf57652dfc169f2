use std::sync::Arc;

/// SharedError is the default error delivered to every caller of a round.
/// All callers receive clones of the same `Arc`, so `Arc::ptr_eq` tells
/// whether two of them observed the same failure.
pub type SharedError = Arc<anyhow::Error>;

/// Options represents the options for a singleflight group
#[derive(Clone, Debug)]
pub struct Options {
    /// RecycleCalls keeps retired call records around for reuse. default is true
    /// when disabled every round allocates a fresh record, results are unaffected.
    pub recycle_calls: bool,
    /// WarmCalls is the number of call records allocated up front. default is 0
    /// ignored when recycle_calls is false.
    pub warm_calls: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            recycle_calls: true,
            warm_calls: 0,
        }
    }
}
