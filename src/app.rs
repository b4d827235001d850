//! 共享请求上下文与路由组装。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::auth::AuthGate;
use crate::config::Config;
use crate::dispatch;
use crate::http::{add_security_headers, resolve_client_ip};
use crate::locale::Locale;
use crate::render::PageRenderer;
use crate::storage::Storage;

/// 所有请求共享的只读状态。
#[derive(Debug)]
pub struct AppContext {
    pub config: Config,
    pub locale: Arc<Locale>,
    pub gate: Arc<AuthGate>,
    pub storage: Storage,
    pub renderer: PageRenderer,
    pub asset_dir: PathBuf,
}

impl AppContext {
    pub fn new(config: Config, locale: Locale, gate: Arc<AuthGate>, asset_dir: PathBuf) -> Self {
        let locale = Arc::new(locale);
        let storage = Storage::new(config.data_folder.clone());
        let renderer = PageRenderer::new(&config, asset_dir.clone(), locale.clone());
        Self {
            config,
            locale,
            gate,
            storage,
            renderer,
            asset_dir,
        }
    }

    /// 去掉 `base_url` 与（若存在）`link_prefix` 后的逻辑路径；不在 `base_url` 下时返回 `None`。
    pub fn logical_path<'p>(&self, decoded: &'p str) -> Option<&'p str> {
        let rest = decoded.strip_prefix(self.config.base_url.as_str())?;
        Some(
            rest.strip_prefix(self.config.link_prefix.as_str())
                .unwrap_or(rest),
        )
    }
}

pub fn build_router(app: Arc<AppContext>) -> Router {
    let trust_forwarded = app.config.trust_forwarded_for;
    let upload_max = usize::try_from(app.config.upload_max).unwrap_or(usize::MAX);

    Router::new()
        .fallback(dispatch::dispatch)
        .layer(DefaultBodyLimit::max(upload_max))
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<_>| {
                    let client_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| {
                            resolve_client_ip(request.headers(), addr.ip(), trust_forwarded)
                                .to_string()
                        })
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(app))
}
