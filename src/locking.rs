//! 内存路径锁：串行化同名上传的最终落盘步骤。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

/// Async mutexes keyed by root-relative destination path.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在给定超时时间内获取路径锁，超时返回 None。
    pub async fn lock(&self, path: &str, timeout: Duration) -> Option<OwnedMutexGuard<()>> {
        let key = normalize_lock_key(path);
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        time::timeout(timeout, lock.lock_owned()).await.ok()
    }
}

fn normalize_lock_key(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches(['/', '\\']);
    trimmed.replace('\\', "/")
}
