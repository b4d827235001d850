//! 请求处理中的错误分类及其状态码与本地化提示。

use axum::http::StatusCode;
use std::io;
use thiserror::Error;
use tracing::{error, warn};

use crate::locale::Locale;
use crate::render::escape_html;
use crate::storage::PathDenied;

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    PathDenied(#[from] PathDenied),
    #[error("not found: {0}")]
    NotFound(io::Error),
    #[error("upload exceeds the limit of {limit} bytes")]
    UploadTooLarge { limit: u64 },
    #[error("malformed upload: {0}")]
    UploadMalformed(String),
    #[error("cannot create upload target: {0}")]
    CreateFailed(io::Error),
    #[error("cannot write upload: {0}")]
    WriteFailed(io::Error),
    #[error("cannot read directory: {0}")]
    ReadFailed(io::Error),
    #[error("cannot read style sheet: {0}")]
    StyleUnavailable(io::Error),
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::PathDenied(_) | GateError::NotFound(_) | GateError::StyleUnavailable(_) => {
                StatusCode::NOT_FOUND
            }
            GateError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GateError::UploadMalformed(_) => StatusCode::BAD_REQUEST,
            GateError::CreateFailed(_) | GateError::WriteFailed(_) | GateError::ReadFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 面向客户端的提示（HTML 片段，变量部分已转义）。
    pub fn message(&self, locale: &Locale) -> String {
        match self {
            GateError::PathDenied(denied) => {
                locale.path_denied(&escape_html(&denied.0.display().to_string()))
            }
            GateError::NotFound(err) | GateError::StyleUnavailable(err) => {
                escape_html(&err.to_string())
            }
            GateError::UploadTooLarge { limit } => locale.upload_too_large(*limit),
            GateError::UploadMalformed(_) => locale.upload_malformed.clone(),
            GateError::CreateFailed(_) => locale.create_failed.clone(),
            GateError::WriteFailed(_) => locale.write_failed.clone(),
            GateError::ReadFailed(_) => locale.read_failed.clone(),
        }
    }

    /// 在检测点记录一次日志。
    pub fn log(&self) {
        match self {
            GateError::PathDenied(denied) => {
                warn!(path = %denied.0.display(), "path outside data root denied")
            }
            GateError::UploadTooLarge { .. } | GateError::UploadMalformed(_) => {
                warn!(error = %self, "upload rejected")
            }
            _ => error!(error = %self, "request failed"),
        }
    }
}
