use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

use crate::call::Call;

/// Free list of retired call records.
///
/// Reuse is best effort: the pool has no capacity bound and no eviction, and
/// a disabled pool simply lets released records drop.
#[derive(Debug)]
pub(crate) struct CallPool<V, E> {
    free: Mutex<Vec<Arc<Call<V, E>>>>,
    recycle: bool,
}

impl<V, E> CallPool<V, E> {
    pub(crate) fn new(recycle: bool, warm: usize) -> Self {
        let free = if recycle {
            (0..warm).map(|_| Arc::new(Call::new())).collect()
        } else {
            Vec::new()
        };
        CallPool {
            free: Mutex::new(free),
            recycle,
        }
    }

    /// Hands out a record with no status, no outcome and no refs.
    pub(crate) fn acquire(&self) -> Arc<Call<V, E>> {
        match self.free.lock().pop() {
            Some(call) => call,
            None => Arc::new(Call::new()),
        }
    }

    /// Must only be called once the record's refs reached zero.
    pub(crate) fn release(&self, call: Arc<Call<V, E>>) {
        if !self.recycle {
            return;
        }
        call.reset();
        self.free.lock().push(call);
        trace!("Call recycled");
    }

    pub(crate) fn len(&self) -> usize {
        self.free.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn drain(&self) -> Vec<Arc<Call<V, E>>> {
        std::mem::take(&mut *self.free.lock())
    }
}
