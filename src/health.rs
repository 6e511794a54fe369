//! 健康检查处理器。

use axum::response::Json as JsonResponse;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInfo {
    status: &'static str,
    version: &'static str,
    build_time: &'static str,
}

/// 存活探针：固定响应，不经过认证。
pub async fn health() -> JsonResponse<HealthInfo> {
    JsonResponse(HealthInfo {
        status: "healthy",
        version: crate::build::PKG_VERSION,
        build_time: crate::build::BUILD_TIME,
    })
}
