use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::quota::{PeriodKey, QuotaError};
use crate::routes::contact::FieldErrors;
use crate::services::{CaptchaError, MailError};

/// 提交流程中每个阶段的失败
#[derive(Debug, Error)]
pub enum ContactError {
    #[error("mailer is not configured")]
    Misconfigured,

    #[error("captcha verifier is not configured")]
    CaptchaMisconfigured,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("request body is not a JSON object")]
    InvalidJson,

    #[error("invalid fields: {0:?}")]
    Validation(FieldErrors),

    #[error("captcha rejected")]
    CaptchaRejected,

    #[error(transparent)]
    CaptchaUnavailable(#[from] CaptchaError),

    #[error("monthly limit {limit} reached for {period}")]
    QuotaExceeded { period: PeriodKey, limit: u64 },

    #[error(transparent)]
    QuotaUnavailable(#[from] QuotaError),

    #[error(transparent)]
    Dispatch(#[from] MailError),
}

#[derive(Serialize, Default)]
struct ErrorResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    period: Option<PeriodKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
}

impl ErrorResponse {
    fn error(code: &str) -> Self {
        Self {
            error: Some(Value::from(code)),
            ..Self::default()
        }
    }

    fn reason(reason: &'static str) -> Self {
        Self {
            reason: Some(reason),
            ..Self::default()
        }
    }
}

impl ContactError {
    pub fn status(&self) -> StatusCode {
        match self {
            ContactError::Misconfigured
            | ContactError::CaptchaMisconfigured
            | ContactError::CaptchaUnavailable(_)
            | ContactError::QuotaUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ContactError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ContactError::InvalidJson
            | ContactError::Validation(_)
            | ContactError::CaptchaRejected => StatusCode::BAD_REQUEST,
            ContactError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ContactError::Dispatch(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ContactError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ContactError::Misconfigured => ErrorResponse::error("misconfigured"),
            ContactError::CaptchaMisconfigured => ErrorResponse::error("captcha_misconfigured"),
            ContactError::PayloadTooLarge => ErrorResponse::error("payload_too_large"),
            ContactError::InvalidJson => ErrorResponse::error("invalid_json"),
            ContactError::Validation(errors) => ErrorResponse {
                errors: Some(errors),
                ..ErrorResponse::default()
            },
            ContactError::CaptchaRejected => ErrorResponse::reason("captcha"),
            ContactError::CaptchaUnavailable(_) => ErrorResponse::error("captcha_unavailable"),
            ContactError::QuotaExceeded { period, limit } => ErrorResponse {
                reason: Some("limit"),
                period: Some(period),
                limit: Some(limit),
                ..ErrorResponse::default()
            },
            ContactError::QuotaUnavailable(_) => ErrorResponse::error("quota_unavailable"),
            ContactError::Dispatch(e) => {
                let (name, message) = e.details();
                ErrorResponse {
                    error: Some(json!({ "name": name, "message": message })),
                    ..ErrorResponse::default()
                }
            }
        };

        (status, Json(body)).into_response()
    }
}
