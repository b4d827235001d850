//! 目录列表、文件下载与样式表响应。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use httpdate::fmt_http_date;
use std::fmt::Write as _;
use std::io::{self, ErrorKind, SeekFrom};
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::GateError;
use crate::render::escape_html;
use crate::storage::FileEntry;

const DOWNLOAD_CONTENT_TYPE: &str = "application/octet-stream";
const STYLE_CONTENT_TYPE: &str = "text/css; charset=utf-8";

/// 对逻辑路径的每一段做百分号编码，保留分隔符。
pub fn encode_path(logical: &str) -> String {
    logical
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 生成目录列表的 HTML 片段；`link_dir` 为已编码、以 `/` 结尾的链接前缀。
pub fn render_listing(
    entries: &[FileEntry],
    link_dir: &str,
    is_admin: bool,
    delete_label: &str,
) -> String {
    let mut html = String::new();
    let delete_label = escape_html(delete_label);

    for entry in entries {
        let link = format!("{link_dir}{}", urlencoding::encode(&entry.name));
        let name = escape_html(&entry.name);
        if is_admin {
            let _ = write!(html, "<a href=\"{link}?delete\">[{delete_label}]</a>    ");
        }
        if entry.is_dir {
            let _ = writeln!(html, "<a href=\"{link}/\">{name} &gt;</a>");
        } else {
            let kb = entry.size as f64 / 1024.0;
            let _ = writeln!(html, "<a href=\"{link}\">{name}</a> ({kb:.2} kB)");
        }
    }
    html
}

/// 以附件形式下载文件，支持单段 Range 请求。
pub async fn download(target: &Path, request_headers: &HeaderMap) -> Result<Response, GateError> {
    let metadata = fs::metadata(target).await.map_err(read_error)?;
    let file_size = metadata.len();
    let last_modified = metadata.modified().ok().map(fmt_http_date);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(DOWNLOAD_CONTENT_TYPE),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(content_disposition(target))?,
    );
    if let Some(value) = &last_modified {
        response_headers.insert(header::LAST_MODIFIED, header_value(value.clone())?);
    }

    // If-Range 只认本服务返回的 Last-Modified
    let if_range_matches = match request_headers
        .get(header::IF_RANGE)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => last_modified.as_deref() == Some(value),
        None => true,
    };
    let range = if if_range_matches {
        parse_range(request_headers.get(header::RANGE), file_size)
    } else {
        ByteRange::Full
    };

    let mut file = File::open(target).await.map_err(read_error)?;
    match range {
        ByteRange::Unsatisfiable => {
            debug!(path = %target.display(), file_size, "range not satisfiable");
            response_headers.insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes */{file_size}"))?,
            );
            Ok((StatusCode::RANGE_NOT_SATISFIABLE, response_headers).into_response())
        }
        ByteRange::Partial { start, end } => {
            let length = end - start + 1;
            debug!(path = %target.display(), start, end, length, "download range");
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(GateError::ReadFailed)?;
            response_headers.insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes {start}-{end}/{file_size}"))?,
            );
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            let stream = ReaderStream::new(file.take(length));
            Ok((
                StatusCode::PARTIAL_CONTENT,
                response_headers,
                AxumBody::from_stream(stream),
            )
                .into_response())
        }
        ByteRange::Full => {
            info!(path = %target.display(), size = file_size, "download");
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file_size));
            Ok((
                StatusCode::OK,
                response_headers,
                AxumBody::from_stream(ReaderStream::new(file)),
            )
                .into_response())
        }
    }
}

/// 返回 `<asset_dir>/<style>.css`。
pub async fn style_sheet(asset_dir: &Path, style: &str) -> Result<Response, GateError> {
    let path = asset_dir.join(format!("{style}.css"));
    let css = fs::read(&path).await.map_err(GateError::StyleUnavailable)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, STYLE_CONTENT_TYPE)],
        css,
    )
        .into_response())
}

#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// 解析单段 `bytes=` Range 头；语法无效或多段请求时返回完整内容。
fn parse_range(value: Option<&HeaderValue>, file_size: u64) -> ByteRange {
    let Some(ranges) = value
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("bytes="))
    else {
        return ByteRange::Full;
    };
    if ranges.contains(',') {
        return ByteRange::Full;
    }
    let Some((start_part, end_part)) = ranges.split_once('-') else {
        return ByteRange::Full;
    };
    let (start_part, end_part) = (start_part.trim(), end_part.trim());

    let (start, end) = if start_part.is_empty() {
        let Ok(suffix) = end_part.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || file_size == 0 {
            return ByteRange::Unsatisfiable;
        }
        (file_size.saturating_sub(suffix), file_size - 1)
    } else {
        let Ok(start) = start_part.parse::<u64>() else {
            return ByteRange::Full;
        };
        let end = if end_part.is_empty() {
            file_size.saturating_sub(1)
        } else {
            match end_part.parse::<u64>() {
                Ok(end) => end.min(file_size.saturating_sub(1)),
                Err(_) => return ByteRange::Full,
            }
        };
        (start, end)
    };

    if start >= file_size || start > end {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial { start, end }
}

fn content_disposition(target: &Path) -> String {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let fallback: String = name
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(&name)
    )
}

fn header_value(value: String) -> Result<HeaderValue, GateError> {
    HeaderValue::try_from(value).map_err(|err| GateError::ReadFailed(io::Error::other(err)))
}

fn read_error(err: io::Error) -> GateError {
    if err.kind() == ErrorKind::NotFound {
        GateError::NotFound(err)
    } else {
        GateError::ReadFailed(err)
    }
}
