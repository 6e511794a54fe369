//! 残留上传临时文件清理的后台任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::TEMP_CLEAN_INTERVAL_SECS;
use crate::storage::Storage;
use crate::upload::{UploadConfig, cleanup_stale_temp};

/// 启动定期清理任务。
pub fn spawn_background_tasks(storage: Arc<Storage>, upload: Arc<UploadConfig>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TEMP_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = cleanup_stale_temp(&storage, &upload).await {
                warn!(error = %err, "upload temp cleanup failed");
            }
        }
    });
}
