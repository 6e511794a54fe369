//! 多文件上传处理器与临时文件清理。

use axum::extract::multipart::Field;
use axum::extract::{Extension, Multipart, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::atomic::{AtomicFile, is_temp_name};
use crate::config::LOCK_WAIT_TIMEOUT_SECS;
use crate::error::ApiError;
use crate::locking::LockManager;
use crate::storage::{Storage, StorageError};

#[derive(Debug)]
pub struct UploadConfig {
    pub max_file_size: u64,
    pub temp_ttl: Duration,
}

#[derive(Deserialize)]
pub(crate) struct UploadQuery {
    path: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct UploadedItem {
    filename: String,
    size: u64,
}

#[derive(Serialize)]
pub(crate) struct FailedItem {
    filename: String,
    error: String,
}

#[derive(Serialize)]
pub(crate) struct UploadReport {
    uploaded: Vec<UploadedItem>,
    errors: Vec<FailedItem>,
    success: usize,
    failed: usize,
}

/// 接收 multipart 上传：文件字段为 `files`，目标子目录来自
/// `path` 查询参数或 `path` 表单字段（作用于其后的文件）。
///
/// Per-item failures (bad filename, collision, size cap) do not stop the
/// batch; a traversal in the destination sub-path fails the whole request.
pub async fn upload_files(
    Query(UploadQuery { path }): Query<UploadQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(locks): Extension<Arc<LockManager>>,
    Extension(config): Extension<Arc<UploadConfig>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut dest = path.unwrap_or_default();
    let mut dest_dir: Option<PathBuf> = None;
    let mut uploaded = Vec::new();
    let mut errors = Vec::new();
    let mut saw_file = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("malformed multipart body".into()))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("path") => {
                dest = field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest("malformed multipart body".into()))?
                    .trim()
                    .to_string();
                dest_dir = None;
            }
            Some("files") => {
                saw_file = true;
                let raw_name = field.file_name().unwrap_or_default().to_string();
                let dir = match &dest_dir {
                    Some(dir) => dir.clone(),
                    None => {
                        let dir = resolve_dest_dir(&storage, &dest).await?;
                        dest_dir = Some(dir.clone());
                        dir
                    }
                };
                match store_file(
                    &locks,
                    config.max_file_size,
                    storage.root_path(),
                    &dir,
                    &raw_name,
                    field,
                )
                .await
                {
                    Ok(item) => uploaded.push(item),
                    Err(reason) => errors.push(FailedItem {
                        filename: raw_name,
                        error: reason,
                    }),
                }
            }
            _ => continue,
        }
    }

    if !saw_file {
        return Err(ApiError::BadRequest("no files provided".into()));
    }

    let status = if errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    let report = UploadReport {
        success: uploaded.len(),
        failed: errors.len(),
        uploaded,
        errors,
    };
    Ok((status, JsonResponse(report)).into_response())
}

/// 解析并校验上传目标目录。
async fn resolve_dest_dir(storage: &Storage, dest: &str) -> Result<PathBuf, ApiError> {
    let relative = (!dest.is_empty()).then_some(dest);
    let target = storage
        .resolve(relative, false)
        .await
        .map_err(|err| match err {
            StorageError::Traversal => ApiError::Forbidden,
            _ => ApiError::BadRequest("invalid upload directory".into()),
        })?;
    let metadata = fs::metadata(&target)
        .await
        .map_err(|_| ApiError::BadRequest("invalid upload directory".into()))?;
    if !metadata.is_dir() {
        return Err(ApiError::BadRequest("invalid upload directory".into()));
    }
    Ok(target)
}

/// 单个文件的落盘流程：清洗文件名、流式写入临时文件、加锁改名。
async fn store_file(
    locks: &LockManager,
    max_file_size: u64,
    root: &Path,
    dest_dir: &Path,
    raw_name: &str,
    mut field: Field<'_>,
) -> Result<UploadedItem, String> {
    let Some(name) = sanitize_filename(raw_name) else {
        return Err("invalid filename".to_string());
    };
    let final_path = dest_dir.join(&name);

    let mut atomic = AtomicFile::create(&final_path).await.map_err(|err| {
        warn!(error = %err, name, "upload temp create failed");
        "write failed".to_string()
    })?;

    let mut written: u64 = 0;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                written += chunk.len() as u64;
                if max_file_size > 0 && written > max_file_size {
                    atomic.discard().await;
                    return Err("file exceeds size limit".to_string());
                }
                if let Err(err) = atomic.file_mut().write_all(&chunk).await {
                    warn!(error = %err, name, "upload write failed");
                    atomic.discard().await;
                    return Err("write failed".to_string());
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, name, "upload stream aborted");
                atomic.discard().await;
                return Err("transfer aborted".to_string());
            }
        }
    }

    // Only the rename touches the shared final name; serialize the
    // existence check plus rename per destination path. The key comes
    // from the resolved path so every spelling of the same destination
    // ("", ".", "docs/") contends on the same lock.
    let lock_key = final_path
        .strip_prefix(root)
        .unwrap_or(&final_path)
        .to_string_lossy()
        .replace(std::path::MAIN_SEPARATOR, "/");
    let guard = locks
        .lock(&lock_key, Duration::from_secs(LOCK_WAIT_TIMEOUT_SECS))
        .await;
    if guard.is_none() {
        atomic.discard().await;
        return Err("destination busy".to_string());
    }
    if fs::metadata(&final_path).await.is_ok() {
        atomic.discard().await;
        return Err("file already exists".to_string());
    }
    if let Err(err) = atomic.commit().await {
        warn!(error = %err, name, "upload finalize failed");
        return Err("write failed".to_string());
    }

    info!(name, size = written, "upload stored");
    Ok(UploadedItem {
        filename: name,
        size: written,
    })
}

/// 清洗客户端文件名：仅保留最后一个路径段。
///
/// Dot-leading names are refused, which also keeps clients out of the
/// in-flight temp file namespace.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.trim().rsplit(['/', '\\']).next().unwrap_or_default();
    if base.is_empty() || base.starts_with('.') || base.contains('\0') {
        return None;
    }
    Some(base.to_string())
}

/// 清理超过 TTL 的残留上传临时文件。
///
/// Aborted uploads whose futures were dropped mid-stream leave their
/// `.part` sibling behind; this sweep keeps them from accumulating.
pub async fn cleanup_stale_temp(storage: &Storage, config: &UploadConfig) -> std::io::Result<()> {
    if config.temp_ttl.is_zero() {
        return Ok(());
    }

    let now = SystemTime::now();
    let mut pending = vec![storage.root_path().to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if metadata.is_dir() {
                if !metadata.file_type().is_symlink() {
                    pending.push(entry.path());
                }
                continue;
            }
            let name = entry.file_name();
            if !is_temp_name(&name.to_string_lossy()) {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|ts| now.duration_since(ts).ok());
            let Some(age) = age else { continue };
            if age >= config.temp_ttl {
                let path = entry.path();
                if let Err(err) = fs::remove_file(&path).await {
                    warn!(path = ?path, error = %err, "failed to remove stale upload temp file");
                } else {
                    info!(path = ?path, "removed stale upload temp file");
                }
            }
        }
    }

    Ok(())
}
