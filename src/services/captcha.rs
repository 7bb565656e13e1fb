use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::CaptchaConfig;

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha verification request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// 验证服务的返回结果
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CaptchaOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub score: Option<f64>,
}

impl CaptchaOutcome {
    /// v2 复选框没有 score，按满分处理
    pub fn passes(&self, min_score: f64) -> bool {
        self.success && self.score.unwrap_or(1.0) >= min_score
    }
}

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    async fn verify(
        &self,
        token: &str,
        remote_ip: Option<&str>,
    ) -> Result<CaptchaOutcome, CaptchaError>;
}

/// Google reCAPTCHA siteverify
pub struct RecaptchaVerifier {
    http: reqwest::Client,
    config: CaptchaConfig,
}

impl RecaptchaVerifier {
    pub fn new(http: reqwest::Client, config: CaptchaConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(
        &self,
        token: &str,
        remote_ip: Option<&str>,
    ) -> Result<CaptchaOutcome, CaptchaError> {
        let mut form = vec![
            ("secret", self.config.secret.as_str()),
            ("response", token),
        ];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip));
        }

        let res = self
            .http
            .post(&self.config.verify_url)
            .form(&form)
            .send()
            .await?;

        // 返回体无法解析时视为验证失败，而不是服务错误
        let body = res.text().await?;
        Ok(serde_json::from_str(&body).unwrap_or_else(|e| {
            tracing::warn!("Unreadable captcha verification response: {}", e);
            CaptchaOutcome::default()
        }))
    }
}
