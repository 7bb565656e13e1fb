use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::FieldLimits;
use crate::quota::PeriodKey;
use crate::services::OutgoingEmail;
use crate::utils::escape_html;

/// 字段名 -> 错误码
pub type FieldErrors = BTreeMap<&'static str, &'static str>;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

/// 联系表单请求体；类型不对的字段按缺失处理
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub subject: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
    #[serde(default, alias = "captchaToken", deserialize_with = "lenient_string")]
    pub verification_token: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// 校验通过的提交内容
#[derive(Debug, Clone, PartialEq)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub subject: Option<String>,
    pub message: String,
}

/// 成功响应
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ContactReceipt {
    pub ok: bool,
    pub period: String,
    pub count: u64,
    pub limit: u64,
}

impl ContactReceipt {
    pub fn new(period: &PeriodKey, count: u64, limit: u64) -> Self {
        Self {
            ok: true,
            period: period.to_string(),
            count,
            limit,
        }
    }
}

fn too_long(value: &str, max: usize) -> bool {
    value.chars().count() > max
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

impl ContactRequest {
    /// 解析请求体，只接受 JSON 对象
    pub fn from_slice(body: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<Value>(body).ok()? {
            value @ Value::Object(_) => serde_json::from_value(value).ok(),
            _ => None,
        }
    }

    /// 非空的验证令牌
    pub fn token(&self) -> Option<&str> {
        self.verification_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// 长度错误覆盖缺失错误
    pub fn validate(&self, limits: &FieldLimits) -> Result<ContactSubmission, FieldErrors> {
        let mut errors = FieldErrors::new();

        let name = self.name.as_deref();
        if is_blank(name) {
            errors.insert("name", "name_required");
        }
        if name.is_some_and(|n| too_long(n, limits.name)) {
            errors.insert("name", "name_too_long");
        }

        let email = self.email.as_deref();
        if !email.is_some_and(|e| EMAIL_RE.is_match(e)) {
            errors.insert("email", "email_invalid");
        }
        if email.is_some_and(|e| too_long(e, limits.email)) {
            errors.insert("email", "email_too_long");
        }

        let message = self.message.as_deref();
        if is_blank(message) {
            errors.insert("message", "message_required");
        }
        if message.is_some_and(|m| too_long(m, limits.message)) {
            errors.insert("message", "message_too_long");
        }

        if self
            .subject
            .as_deref()
            .is_some_and(|s| too_long(s, limits.subject))
        {
            errors.insert("subject", "subject_too_long");
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(ContactSubmission {
            name: self.name.clone().unwrap_or_default().trim().to_string(),
            email: self.email.clone().unwrap_or_default(),
            subject: self
                .subject
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            message: self.message.clone().unwrap_or_default(),
        })
    }
}

impl ContactSubmission {
    pub fn subject_line(&self, prefix: &str) -> String {
        match &self.subject {
            Some(subject) => format!("{} {}", prefix, subject),
            None => format!("{} Nuevo mensaje de {}", prefix, self.name),
        }
    }

    pub fn to_html(&self) -> String {
        format!(
            concat!(
                "<div>",
                "<p><strong>Nombre:</strong> {}</p>",
                "<p><strong>Email:</strong> {}</p>",
                "<p><strong>Asunto:</strong> {}</p>",
                "<p><strong>Mensaje:</strong></p>",
                "<pre style=\"white-space:pre-wrap;font-family:system-ui;\">{}</pre>",
                "</div>"
            ),
            escape_html(&self.name),
            escape_html(&self.email),
            escape_html(self.subject.as_deref().unwrap_or("(sin asunto)")),
            escape_html(&self.message),
        )
    }

    /// 组装发给站长的邮件，回复地址为访客邮箱
    pub fn to_email(&self, from: &str, to: &str, subject_prefix: &str) -> OutgoingEmail {
        OutgoingEmail {
            from: from.to_string(),
            to: to.to_string(),
            subject: self.subject_line(subject_prefix),
            html: self.to_html(),
            reply_to: self.email.clone(),
        }
    }
}
