use std::sync::Arc;

use config::Config;
use quota::QuotaCounter;
use services::{CaptchaVerifier, Mailer};

pub mod config;
pub mod error;
pub mod middleware;
pub mod quota;
pub mod routes;
pub mod services;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub quota: QuotaCounter,
    /// 未配置时为 None，请求会以 500 拒绝
    pub verifier: Option<Arc<dyn CaptchaVerifier>>,
    pub mailer: Option<Arc<dyn Mailer>>,
}
