//! 请求分发：按固定顺序依次执行封禁、认证、上传、路径限制、
//! 注销、样式表、存在性检查、删除、目录列表与下载。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Basic;
use axum_extra::headers::{Authorization, HeaderMapExt};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::app::AppContext;
use crate::auth::{Admission, Credentials, Identity};
use crate::config::{AUTH_REALM, DELETE_MARKER, LOGOUT_MARKER};
use crate::error::GateError;
use crate::files::{self, encode_path};
use crate::http::resolve_client_ip;
use crate::render::PageContext;
use crate::upload::accept_upload;

const LOGGED_OUT_TITLE: &str = "-";

pub async fn dispatch(
    Extension(app): Extension<Arc<AppContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<AxumBody>,
) -> Response {
    let logical = match urlencoding::decode(request.uri().path()) {
        Ok(decoded) => match app.logical_path(&decoded) {
            Some(logical) => logical.to_owned(),
            None => return StatusCode::NOT_FOUND.into_response(),
        },
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let query = request.uri().query().unwrap_or_default().to_owned();
    let headers = request.headers().clone();

    let client_ip = resolve_client_ip(&headers, peer.ip(), app.config.trust_forwarded_for);
    let credentials = headers
        .typed_get::<Authorization<Basic>>()
        .map(|Authorization(basic)| Credentials {
            username: basic.username().to_string(),
            password: basic.password().to_string(),
        });
    let identity = match app.gate.admit(client_ip, credentials).await {
        Admission::Banned => return ().into_response(),
        Admission::Unauthorized => return challenge(app.locale.unauthorized.clone()),
        Admission::Admitted(identity) => identity,
    };

    let scope = Scope {
        app: &app,
        identity: &identity,
    };
    let dir = directory_of(&logical).to_owned();

    let mut target_logical = logical.as_str();
    if request.method() == Method::POST && identity.is_admin {
        match accept_upload(&app.storage, &dir, request, app.config.upload_max).await {
            Ok(stored) => info!(
                user = %identity.username,
                path = %stored.path.display(),
                size = stored.size,
                "file uploaded"
            ),
            Err(err) => return scope.fail(err, &dir).await,
        }
        target_logical = &dir;
    }

    let mut target = match app.storage.resolve(target_logical) {
        Ok(target) => target,
        Err(denied) => return scope.fail(denied.into(), &dir).await,
    };

    if query == LOGOUT_MARKER {
        let page = PageContext {
            title: LOGGED_OUT_TITLE,
            is_admin: false,
            folder: &dir,
        };
        let mut response = app
            .renderer
            .render(StatusCode::UNAUTHORIZED, &app.locale.logged_out, page)
            .await;
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            header::HeaderValue::from_static(AUTH_REALM),
        );
        return response;
    }

    if query == app.config.style {
        return match files::style_sheet(&app.asset_dir, &app.config.style).await {
            Ok(response) => response,
            Err(err) => scope.fail(err, &dir).await,
        };
    }

    let mut metadata = match fs::metadata(&target).await {
        Ok(metadata) => metadata,
        Err(err) => return scope.fail(stat_error(err), &dir).await,
    };

    let mut link_dir = if metadata.is_dir() && !logical.is_empty() && !logical.ends_with('/') {
        format!("{logical}/")
    } else {
        dir.clone()
    };

    if query == DELETE_MARKER && identity.is_admin {
        if app.storage.is_root(&target) {
            warn!(user = %identity.username, "refusing to delete the data folder");
        } else {
            match app.storage.remove(&target).await {
                Ok(()) => info!(user = %identity.username, path = %target.display(), "deleted"),
                Err(err) => error!(path = %target.display(), error = %err, "delete failed"),
            }
        }
        link_dir = directory_of(logical.trim_end_matches('/')).to_owned();
        (target, metadata) = match resolve_existing(scope, &link_dir).await {
            Ok(found) => found,
            Err(err) => return scope.fail(err, &link_dir).await,
        };
    }

    if metadata.is_dir() {
        let entries = match app.storage.list_dir(&target).await {
            Ok(entries) => entries,
            Err(err) => return scope.fail(GateError::ReadFailed(err), &link_dir).await,
        };
        debug!(path = %target.display(), count = entries.len(), "list directory");
        let link_base = format!(
            "{}{}{}",
            app.config.base_url,
            app.config.link_prefix,
            encode_path(&link_dir)
        );
        let listing = files::render_listing(
            &entries,
            &link_base,
            identity.is_admin,
            &app.locale.delete_link,
        );
        return scope.page(StatusCode::OK, &listing, &link_dir).await;
    }

    match files::download(&target, &headers).await {
        Ok(response) => response,
        Err(err) => scope.fail(err, &dir).await,
    }
}

/// 已认证请求的页面渲染上下文。
#[derive(Clone, Copy)]
struct Scope<'a> {
    app: &'a AppContext,
    identity: &'a Identity,
}

impl Scope<'_> {
    async fn page(self, status: StatusCode, message: &str, folder: &str) -> Response {
        let page = PageContext {
            title: &self.identity.username,
            is_admin: self.identity.is_admin,
            folder,
        };
        self.app.renderer.render(status, message, page).await
    }

    async fn fail(self, err: GateError, folder: &str) -> Response {
        err.log();
        self.page(err.status(), &err.message(&self.app.locale), folder)
            .await
    }
}

async fn resolve_existing(
    scope: Scope<'_>,
    logical: &str,
) -> Result<(PathBuf, std::fs::Metadata), GateError> {
    let target = scope.app.storage.resolve(logical)?;
    let metadata = fs::metadata(&target).await.map_err(stat_error)?;
    Ok((target, metadata))
}

fn challenge(message: String) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [
            (header::WWW_AUTHENTICATE, AUTH_REALM),
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
        ],
        message,
    )
        .into_response()
}

fn stat_error(err: std::io::Error) -> GateError {
    if err.kind() == ErrorKind::NotFound {
        GateError::NotFound(err)
    } else {
        GateError::ReadFailed(err)
    }
}

/// 截取到最后一个 `/`（含）为止的部分。
fn directory_of(logical: &str) -> &str {
    match logical.rfind('/') {
        Some(index) => &logical[..=index],
        None => "",
    }
}
