use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// 默认每月发送上限
pub const DEFAULT_MONTHLY_LIMIT: u64 = 3000;

/// 默认请求体上限 (50KB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 51200;

/// 默认人机验证分数阈值
pub const DEFAULT_MIN_SCORE: f64 = 0.5;

const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// 读取当前配置的月度上限，每次调用都重新读取环境变量
pub type LimitSource = Arc<dyn Fn() -> u64 + Send + Sync>;

/// 各字段的最大长度（按字符计）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLimits {
    pub name: usize,
    pub email: usize,
    pub subject: usize,
    pub message: usize,
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self {
            name: 80,
            email: 254,
            subject: 120,
            message: 4000,
        }
    }
}

/// 邮件服务配置，三项齐全才视为可用
#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub api_key: String,
    pub from: String,
    pub to: String,
    pub api_url: String,
}

/// 人机验证配置
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub secret: String,
    pub verify_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub redis_url: Option<String>,
    pub quota_store_timeout_ms: u64,
    pub monthly_limit: u64,
    pub max_body_bytes: usize,
    pub field_limits: FieldLimits,
    pub subject_prefix: String,
    pub min_score: f64,
    pub captcha: Option<CaptchaConfig>,
    pub mailer: Option<MailerConfig>,
    pub http_client_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            api_base_uri: "/api".to_string(),
            redis_url: None,
            quota_store_timeout_ms: 2000,
            monthly_limit: DEFAULT_MONTHLY_LIMIT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            field_limits: FieldLimits::default(),
            subject_prefix: "[Contacto]".to_string(),
            min_score: DEFAULT_MIN_SCORE,
            captcha: None,
            mailer: None,
            http_client_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let field_defaults = FieldLimits::default();

        let captcha = non_empty("RECAPTCHA_SECRET_KEY").map(|secret| CaptchaConfig {
            secret,
            verify_url: non_empty("RECAPTCHA_VERIFY_URL")
                .unwrap_or_else(|| RECAPTCHA_VERIFY_URL.to_string()),
        });

        let mailer = match (
            non_empty("RESEND_API_KEY"),
            non_empty("RESEND_FROM"),
            non_empty("RESEND_TO"),
        ) {
            (Some(api_key), Some(from), Some(to)) => Some(MailerConfig {
                api_key,
                from,
                to,
                api_url: non_empty("RESEND_API_URL").unwrap_or_else(|| RESEND_API_URL.to_string()),
            }),
            _ => None,
        };

        Config {
            server_host: non_empty("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_or("SERVER_PORT", defaults.server_port),
            api_base_uri: non_empty("API_BASE_URI").unwrap_or(defaults.api_base_uri),
            redis_url: non_empty("REDIS_URL"),
            quota_store_timeout_ms: parse_or(
                "QUOTA_STORE_TIMEOUT_MS",
                defaults.quota_store_timeout_ms,
            ),
            monthly_limit: read_monthly_limit(DEFAULT_MONTHLY_LIMIT),
            max_body_bytes: parse_or("CONTACT_MAX_BODY_BYTES", defaults.max_body_bytes),
            field_limits: FieldLimits {
                name: parse_or("CONTACT_MAX_NAME", field_defaults.name),
                email: parse_or("CONTACT_MAX_EMAIL", field_defaults.email),
                subject: parse_or("CONTACT_MAX_SUBJECT", field_defaults.subject),
                message: parse_or("CONTACT_MAX_MESSAGE", field_defaults.message),
            },
            subject_prefix: non_empty("CONTACT_SUBJECT_PREFIX").unwrap_or(defaults.subject_prefix),
            min_score: parse_or("RECAPTCHA_MIN_SCORE", defaults.min_score),
            captcha,
            mailer,
            http_client_timeout_secs: parse_or(
                "HTTP_CLIENT_TIMEOUT_SECS",
                defaults.http_client_timeout_secs,
            ),
        }
    }

    pub fn quota_store_timeout(&self) -> Duration {
        Duration::from_millis(self.quota_store_timeout_ms)
    }

    pub fn http_client_timeout(&self) -> Duration {
        Duration::from_secs(self.http_client_timeout_secs)
    }

    /// 月度上限来源：运行时重新读取环境变量，未设置时退回到启动时的值
    pub fn limit_source(&self) -> LimitSource {
        let fallback = self.monthly_limit;
        Arc::new(move || read_monthly_limit(fallback))
    }
}

/// 读取月度上限，兼容旧变量名 RESEND_MONTHLY_LIMIT
pub fn read_monthly_limit(default: u64) -> u64 {
    let key = if env::var("CONTACT_MONTHLY_LIMIT").is_ok() {
        "CONTACT_MONTHLY_LIMIT"
    } else {
        "RESEND_MONTHLY_LIMIT"
    };
    parse_or(key, default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match non_empty(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}: {:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}
