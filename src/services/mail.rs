use async_trait::async_trait;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MailerConfig;

/// 错误描述最多保留的字符数，代理返回的 HTML 错误页会被截断
const MAX_ERROR_MESSAGE_CHARS: usize = 500;

fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((cut, _)) => format!("{}…", &message[..cut]),
        None => message.to_string(),
    }
}

/// 待发送的邮件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub reply_to: String,
}

/// 发送成功后的回执
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailReceipt {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("mail service rejected message ({status}): {name}: {message}")]
    Rejected {
        status: u16,
        name: String,
        message: String,
    },
}

impl MailError {
    /// 返回给调用方的错误名称和描述
    pub fn details(&self) -> (String, String) {
        match self {
            MailError::Transport(e) => ("transport_error".to_string(), e.to_string()),
            MailError::Rejected { name, message, .. } => (name.clone(), message.clone()),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// 发送邮件；idempotency_key 用于防止同一次提交被重复投递
    async fn send(
        &self,
        email: &OutgoingEmail,
        idempotency_key: &str,
    ) -> Result<MailReceipt, MailError>;

    /// 发件人、收件人
    fn sender(&self) -> &str;
    fn recipient(&self) -> &str;
}

/// 服务端返回的错误结构
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResendErrorBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Resend HTTP API
pub struct ResendMailer {
    http: reqwest::Client,
    config: MailerConfig,
}

impl ResendMailer {
    pub fn new(http: reqwest::Client, config: MailerConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(
        &self,
        email: &OutgoingEmail,
        idempotency_key: &str,
    ) -> Result<MailReceipt, MailError> {
        let mut req = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(email);
        if let Ok(value) = HeaderValue::from_str(idempotency_key) {
            req = req.header("Idempotency-Key", value);
        }

        let res = req.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res.json::<MailReceipt>().await.unwrap_or_default());
        }

        let body = res.text().await.unwrap_or_default();
        let parsed: ResendErrorBody = serde_json::from_str(&body).unwrap_or_default();
        Err(MailError::Rejected {
            status: status.as_u16(),
            name: parsed.name.unwrap_or_else(|| "application_error".to_string()),
            message: truncate_message(parsed.message.as_deref().unwrap_or(&body)),
        })
    }

    fn sender(&self) -> &str {
        &self.config.from
    }

    fn recipient(&self) -> &str {
        &self.config.to
    }
}
