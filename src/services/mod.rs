/// 外部服务
/// 人机验证和邮件发送，均通过 trait 注入，测试时可替换

pub mod captcha;
pub mod mail;

pub use captcha::{CaptchaError, CaptchaOutcome, CaptchaVerifier, RecaptchaVerifier};
pub use mail::{MailError, MailReceipt, Mailer, OutgoingEmail, ResendMailer};
