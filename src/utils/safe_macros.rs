//! 锁获取宏：锁中毒转换为 `SimError::Other`，由调用方以 `?` 向上传播

/// 获取互斥锁
#[macro_export]
macro_rules! safe_lock {
    ($mutex:expr) => {
        $mutex.lock().map_err(|e| {
            log::error!("❌ 互斥锁 {} 已中毒: {}", stringify!($mutex), e);
            $crate::core::error::SimError::Other(format!("lock poisoned: {}", stringify!($mutex)))
        })
    };
}

/// 获取读锁
#[macro_export]
macro_rules! safe_read {
    ($rwlock:expr) => {
        $rwlock.read().map_err(|e| {
            log::error!("❌ 读锁 {} 已中毒: {}", stringify!($rwlock), e);
            $crate::core::error::SimError::Other(format!("read lock poisoned: {}", stringify!($rwlock)))
        })
    };
}

/// 获取写锁
#[macro_export]
macro_rules! safe_write {
    ($rwlock:expr) => {
        $rwlock.write().map_err(|e| {
            log::error!("❌ 写锁 {} 已中毒: {}", stringify!($rwlock), e);
            $crate::core::error::SimError::Other(format!("write lock poisoned: {}", stringify!($rwlock)))
        })
    };
}

#[cfg(test)]
mod tests {
    use crate::core::error::SimError;
    use std::sync::{Arc, Mutex, RwLock};

    fn poison_mutex(lock: &Arc<Mutex<u32>>) {
        let cloned = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison");
        })
        .join();
    }

    #[test]
    fn poisoned_mutex_becomes_other_error() {
        let lock = Arc::new(Mutex::new(1));
        poison_mutex(&lock);
        let result: Result<u32, SimError> = crate::safe_lock!(lock).map(|g| *g);
        match result {
            Err(SimError::Other(msg)) => assert!(msg.contains("lock poisoned")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn healthy_rwlock_passes_through() {
        let lock = RwLock::new(5);
        *crate::safe_write!(lock).unwrap() += 1;
        assert_eq!(*crate::safe_read!(lock).unwrap(), 6);
    }
}
