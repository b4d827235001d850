//! 管理员上传：解析 multipart 请求体并写入数据目录。

use axum::body::Body as AxumBody;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{FromRequest, Multipart};
use axum::http::{Request, StatusCode};
use std::io;
use std::path::PathBuf;
use tracing::debug;

use crate::atomic::AtomicFile;
use crate::config::UPLOAD_FIELD;
use crate::error::GateError;
use crate::storage::{Storage, sanitize_filename};

#[derive(Debug)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub size: u64,
}

/// 将 `file` 字段保存到 `dir`（数据目录内的逻辑路径）下，文件名先经过清洗。
///
/// 大小上限由路由上的 `DefaultBodyLimit` 执行，`limit` 只用于错误提示。
pub async fn accept_upload(
    storage: &Storage,
    dir: &str,
    request: Request<AxumBody>,
    limit: u64,
) -> Result<StoredUpload, GateError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| GateError::UploadMalformed(rejection.body_text()))?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                return Err(GateError::UploadMalformed(format!(
                    "no {UPLOAD_FIELD:?} field in form"
                )));
            }
            Err(err) => return Err(multipart_error(err, limit)),
        };
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "skipping form field");
            continue;
        }

        let Some(original) = field.file_name().map(str::to_owned) else {
            return Err(GateError::UploadMalformed("file field has no file name".into()));
        };
        let folder = storage.resolve(dir)?;
        let name = sanitize_filename(&original);
        let path = storage.resolve(&format!("{dir}{name}"))?;
        // "." 会折叠为目录本身，临时文件将落到目录之外
        if path.parent() != Some(folder.as_path()) {
            return Err(GateError::CreateFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("file name {name:?} does not name a file"),
            )));
        }
        let size = write_field(field, &path, limit).await?;
        return Ok(StoredUpload { path, size });
    }
}

async fn write_field(
    mut field: Field<'_>,
    target: &std::path::Path,
    limit: u64,
) -> Result<u64, GateError> {
    let mut file = AtomicFile::create(target)
        .await
        .map_err(GateError::CreateFailed)?;

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(err) = file.write_all(&chunk).await {
                    file.discard().await;
                    return Err(GateError::WriteFailed(err));
                }
            }
            Ok(None) => break,
            Err(err) => {
                file.discard().await;
                return Err(multipart_error(err, limit));
            }
        }
    }

    file.commit().await.map_err(GateError::WriteFailed)
}

fn multipart_error(err: MultipartError, limit: u64) -> GateError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GateError::UploadTooLarge { limit }
    } else {
        GateError::UploadMalformed(err.body_text())
    }
}
