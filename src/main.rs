use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use contact_backend::{
    AppState,
    config::Config,
    quota::QuotaCounter,
    routes,
    services::{CaptchaVerifier, Mailer, RecaptchaVerifier, ResendMailer},
};
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env();

    // 选择配额存储，运行期间不再切换
    let quota = QuotaCounter::from_config(&config).expect("Failed to set up quota store");
    tracing::info!(
        "Contact quota backend: {}, monthly limit: {}",
        quota.backend(),
        quota.limit()
    );

    let http = reqwest::Client::builder()
        .timeout(config.http_client_timeout())
        .build()
        .expect("Failed to build HTTP client");

    let verifier: Option<Arc<dyn CaptchaVerifier>> = match &config.captcha {
        Some(captcha) => Some(Arc::new(RecaptchaVerifier::new(http.clone(), captcha.clone()))),
        None => {
            tracing::warn!("RECAPTCHA_SECRET_KEY is not set, contact submissions will be rejected");
            None
        }
    };
    let mailer: Option<Arc<dyn Mailer>> = match &config.mailer {
        Some(mailer) => Some(Arc::new(ResendMailer::new(http.clone(), mailer.clone()))),
        None => {
            tracing::warn!(
                "RESEND_API_KEY, RESEND_FROM or RESEND_TO is not set, contact submissions will be rejected"
            );
            None
        }
    };

    // 设置应用状态
    let state = AppState {
        config: config.clone(),
        quota,
        verifier,
        mailer,
    };

    let router = routes::router(state);

    // 开发模式下允许跨域
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
