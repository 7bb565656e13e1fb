use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::{AppState, utils::success_to_api_response};

/// Ping响应
#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    /// 服务状态
    pub status: String,
    /// 服务器时间
    pub timestamp: i64,
    /// 当前计数周期
    pub period: String,
    /// 配额存储类型
    pub backend: String,
}

/// 健康检查接口，不访问配额存储
pub async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    let now = state.quota.now();

    (
        StatusCode::OK,
        success_to_api_response(PingResponse {
            status: "ok".to_string(),
            timestamp: now.timestamp(),
            period: state.quota.current_period().to_string(),
            backend: state.quota.backend().to_string(),
        }),
    )
}
