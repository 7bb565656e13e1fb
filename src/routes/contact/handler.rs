use std::net::SocketAddr;

use axum::{
    Json,
    body::to_bytes,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header::CONTENT_LENGTH},
};

use super::model::{ContactReceipt, ContactRequest};
use crate::{
    AppState,
    error::ContactError,
    quota::Admission,
    utils::{client_ip, ip_fingerprint},
};

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// 联系表单提交
///
/// 依次执行：配置检查、大小限制、字段校验、令牌检查、配额准入、人机验证、发送邮件、计数。
/// 任一阶段失败都直接返回，计数只在邮件发送成功后增加。
#[axum::debug_handler]
pub async fn submit(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<ContactReceipt>, ContactError> {
    let mailer = state.mailer.clone().ok_or(ContactError::Misconfigured)?;
    let verifier = state
        .verifier
        .clone()
        .ok_or(ContactError::CaptchaMisconfigured)?;

    let max_body = state.config.max_body_bytes;
    if declared_length(request.headers()).is_some_and(|len| len > max_body as u64) {
        return Err(ContactError::PayloadTooLarge);
    }

    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let ip = client_ip(request.headers(), remote);
    let fingerprint = ip_fingerprint(ip.as_deref());

    // 未声明长度的请求体同样受上限约束
    let body = to_bytes(request.into_body(), max_body)
        .await
        .map_err(|_| ContactError::PayloadTooLarge)?;

    let req = ContactRequest::from_slice(&body).ok_or(ContactError::InvalidJson)?;

    let submission = req.validate(&state.config.field_limits).map_err(|errors| {
        tracing::info!("Contact submission rejected by validation: {:?}", errors);
        ContactError::Validation(errors)
    })?;

    let Some(token) = req.token() else {
        tracing::info!("Contact submission without captcha token from {}", fingerprint);
        return Err(ContactError::CaptchaRejected);
    };

    // 本地能判断的错误（字段、缺少令牌）在读配额前拒绝；
    // 远程人机验证和发信都放在配额检查之后，超额时不再调用外部服务
    let period = state.quota.current_period();
    let limit = match state.quota.admit(&period).await {
        Ok(Admission::Allowed { limit, .. }) => limit,
        Ok(Admission::Exhausted { count, limit }) => {
            tracing::warn!("Monthly contact limit reached: {}/{} for {}", count, limit, period);
            return Err(ContactError::QuotaExceeded { period, limit });
        }
        Err(e) => {
            tracing::error!("Failed to read contact quota for {}: {}", period, e);
            return Err(e.into());
        }
    };

    let outcome = verifier
        .verify(token, ip.as_deref())
        .await
        .inspect_err(|e| tracing::error!("Captcha verification failed: {}", e))?;
    if !outcome.passes(state.config.min_score) {
        tracing::info!(
            "Captcha rejected for {} (success: {}, score: {:?})",
            fingerprint,
            outcome.success,
            outcome.score
        );
        return Err(ContactError::CaptchaRejected);
    }

    let submission_id = uuid::Uuid::new_v4().to_string();
    let email = submission.to_email(
        mailer.sender(),
        mailer.recipient(),
        &state.config.subject_prefix,
    );
    let receipt = mailer
        .send(&email, &submission_id)
        .await
        .inspect_err(|e| tracing::error!("Failed to send contact email {}: {}", submission_id, e))?;

    // 只统计发送成功的请求
    let count = state.quota.increment(&period).await.map_err(|e| {
        tracing::error!(
            "Contact email {} was sent but the quota could not be updated: {}",
            submission_id,
            e
        );
        ContactError::from(e)
    })?;

    tracing::info!(
        "Contact email {} sent (provider id: {:?}), {}/{} for {}",
        submission_id,
        receipt.id,
        count,
        limit,
        period
    );

    Ok(Json(ContactReceipt::new(&period, count, limit)))
}
