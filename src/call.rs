use parking_lot::{Condvar, Mutex};
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
pub(crate) enum Status<V, E> {
    Starting,
    LeaderDrop,
    Done(Result<V, E>),
}

/// Call is one round of work for a key: the outcome slot, the completion
/// signal and the number of callers still attached to it.
#[derive(Debug)]
pub(crate) struct Call<V, E> {
    status: Mutex<Status<V, E>>,
    cvar: Condvar,
    notify: Notify,
    refs: AtomicUsize,
}

impl<V, E> Call<V, E> {
    pub(crate) fn new() -> Self {
        Call {
            status: Mutex::new(Status::Starting),
            cvar: Condvar::new(),
            notify: Notify::new(),
            refs: AtomicUsize::new(0),
        }
    }

    pub(crate) fn attach(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true when the caller was the last one attached.
    pub(crate) fn detach(&self) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "call detached more times than attached");
        prev == 1
    }

    pub(crate) fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Publishes the final status and wakes every waiter, blocking or async.
    pub(crate) fn complete(&self, status: Status<V, E>) {
        let mut current = self.status.lock();
        debug_assert!(matches!(*current, Status::Starting));
        *current = status;
        drop(current);
        self.cvar.notify_all();
        self.notify.notify_waiters();
    }

    /// Puts the record back into its pristine state. Only valid once no
    /// caller is attached anymore.
    pub(crate) fn reset(&self) {
        debug_assert_eq!(self.refs(), 0);
        *self.status.lock() = Status::Starting;
        self.refs.store(0, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_pristine(&self) -> bool {
        self.refs() == 0 && matches!(*self.status.lock(), Status::Starting)
    }
}

impl<V: Clone, E: Clone> Call<V, E> {
    /// `None` while the round is still running.
    fn settled(&self) -> Option<Option<Result<V, E>>> {
        match &*self.status.lock() {
            Status::Starting => None,
            Status::LeaderDrop => Some(None),
            Status::Done(result) => Some(Some(result.clone())),
        }
    }

    /// Blocks until the leader completes. Yields `None` if the leader was
    /// dropped before producing anything.
    pub(crate) fn wait(&self) -> Option<Result<V, E>> {
        let mut status = self.status.lock();
        while matches!(*status, Status::Starting) {
            self.cvar.wait(&mut status);
        }
        match &*status {
            Status::Done(result) => Some(result.clone()),
            _ => None,
        }
    }

    pub(crate) async fn wait_async(&self) -> Option<Result<V, E>> {
        loop {
            let mut notified = pin!(self.notify.notified());
            // register before looking at the status so a completion racing
            // with this check cannot be missed
            notified.as_mut().enable();
            if let Some(settled) = self.settled() {
                return settled;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Call, Status};
    use std::sync::Arc;
    use std::thread::spawn;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_refs_counting() {
        let call = Call::<i32, ()>::new();
        call.attach();
        call.attach();
        assert_eq!(call.refs(), 2);
        assert!(!call.detach());
        assert!(call.detach());
        assert_eq!(call.refs(), 0);
    }

    #[test]
    #[traced_test]
    fn test_wait_wakes_all() {
        let call = Arc::new(Call::<String, ()>::new());
        let (tx, rx) = std::sync::mpsc::channel();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let call = call.clone();
                let tx = tx.clone();
                spawn(move || {
                    tx.send(()).unwrap();
                    call.wait()
                })
            })
            .collect();
        for _ in 0..4 {
            rx.recv().unwrap();
        }
        call.complete(Status::Done(Ok("v".to_owned())));
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Some(Ok("v".to_owned())));
        }
    }

    #[test]
    #[traced_test]
    fn test_wait_after_leader_drop() {
        let call = Call::<i32, ()>::new();
        call.complete(Status::LeaderDrop);
        assert_eq!(call.wait(), None);
    }

    #[test]
    #[traced_test]
    fn test_reset() {
        let call = Call::<i32, &'static str>::new();
        call.attach();
        call.complete(Status::Done(Err("boom")));
        assert!(call.detach());
        call.reset();
        assert!(call.is_pristine());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_wait_async() {
        let call = Arc::new(Call::<i32, ()>::new());
        let waiter = {
            let call = call.clone();
            tokio::spawn(async move { call.wait_async().await })
        };
        tokio::task::yield_now().await;
        call.complete(Status::Done(Ok(7)));
        assert_eq!(waiter.await.unwrap(), Some(Ok(7)));
    }
}
