use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

/// Shared read access, taking over a poisoned lock instead of failing.
pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    store: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), store, op, "read")
}

/// Exclusive access, taking over a poisoned lock instead of failing.
pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    store: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), store, op, "write")
}

fn recover<G>(
    result: LockResult<G>,
    store: &'static str,
    op: &'static str,
    access: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            store,
            op,
            access,
            "Keyspace lock was poisoned by a panicking writer; continuing with its last state"
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn poisoned_lock_is_recovered() {
        let lock = Arc::new(RwLock::new(1));
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let mut guard = poisoner.write().expect("first writer");
            *guard = 2;
            panic!("poison the lock");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(*rw_read(&lock, "test", "read"), 2);
        *rw_write(&lock, "test", "write") = 3;
        assert_eq!(*rw_read(&lock, "test", "read"), 3);
    }
}
