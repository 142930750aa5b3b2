// ==========================================
// 施工时刻表导入引擎 - 按键加锁
// ==========================================
// 职责: 为每个键提供独立互斥锁（直接导入: (车次, 时刻表年度)）
// 红线: 按键锁只锁单个键；不再被引用的键随即移除
// ==========================================

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 持有 key 对应的锁执行 f
    pub fn with_lock<T>(&self, key: &K, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(key);
        let result = {
            let _guard = match lock.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            f()
        };
        self.release(key, lock);
        result
    }

    /// 没有其他持有者时从表中移除（表中一份 + 本次一份）
    fn release(&self, key: &K, lock: Arc<Mutex<()>>) {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // 引用计数只在表锁内增减
        let last = Arc::strong_count(&lock) == 2;
        drop(lock);
        if last {
            locks.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
