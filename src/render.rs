//! 页面渲染：读取模板文件并填充占位符。
//!
//! 模板语法：`{{name}}` 插入转义后的值，`{{message}}` 原样插入 HTML 片段，
//! `{{#admin}}...{{/admin}}` 中的内容仅对管理员保留。

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::error;

use crate::config::Config;
use crate::locale::Locale;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const ADMIN_SECTION: &str = "admin";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("cannot read template: {0}")]
    Read(#[from] std::io::Error),
    #[error("unknown placeholder {{{{{0}}}}}")]
    UnknownPlaceholder(String),
    #[error("unknown section {0:?}")]
    UnknownSection(String),
    #[error("section {0:?} is not closed")]
    Unclosed(String),
    #[error("unexpected closing tag {0:?}")]
    UnexpectedClose(String),
    #[error("unterminated tag")]
    UnterminatedTag,
}

/// 页面的请求相关数据。
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub title: &'a str,
    pub is_admin: bool,
    pub folder: &'a str,
}

#[derive(Debug)]
pub struct PageRenderer {
    template_path: PathBuf,
    base_url: String,
    link_prefix: String,
    style: String,
    locale: Arc<Locale>,
}

impl PageRenderer {
    pub fn new(config: &Config, asset_dir: PathBuf, locale: Arc<Locale>) -> Self {
        Self {
            template_path: asset_dir.join(&config.template),
            base_url: config.base_url.clone(),
            link_prefix: config.link_prefix.clone(),
            style: config.style.clone(),
            locale,
        }
    }

    /// 渲染完整页面；模板失败时退化为本地化的纯文本提示。
    pub async fn render(
        &self,
        status: StatusCode,
        message: &str,
        page: PageContext<'_>,
    ) -> Response {
        match self.fill(message, page).await {
            Ok(html) => {
                (status, [(header::CONTENT_TYPE, HTML_CONTENT_TYPE)], html).into_response()
            }
            Err(err) => {
                error!(
                    error = %err,
                    template = %self.template_path.display(),
                    "page render failed"
                );
                (
                    status,
                    [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
                    self.locale.template_error.clone(),
                )
                    .into_response()
            }
        }
    }

    async fn fill(&self, message: &str, page: PageContext<'_>) -> Result<String, TemplateError> {
        let source = fs::read_to_string(&self.template_path).await?;
        fill_template(&source, page.is_admin, |name| {
            let value = match name {
                "message" => return Some(Cow::Borrowed(message)),
                "title" => page.title,
                "folder" => page.folder,
                "base_url" => self.base_url.as_str(),
                "link_prefix" => self.link_prefix.as_str(),
                "style" => self.style.as_str(),
                "home_text" => self.locale.home_link.as_str(),
                "logout_text" => self.locale.logout_link.as_str(),
                "upload_text" => self.locale.upload_button.as_str(),
                "logged_out_text" => self.locale.logged_out.as_str(),
                _ => return None,
            };
            Some(Cow::Owned(escape_html(value)))
        })
    }
}

fn fill_template<'v>(
    source: &str,
    is_admin: bool,
    lookup: impl Fn(&str) -> Option<Cow<'v, str>>,
) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(source.len());
    // 每个未闭合区块一项：名称及其内容是否输出
    let mut sections: Vec<(&str, bool)> = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        let emitting = sections.iter().all(|(_, active)| *active);
        if emitting {
            output.push_str(&rest[..start]);
        }
        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or(TemplateError::UnterminatedTag)?;
        let tag = after_open[..end].trim();
        rest = &after_open[end + 2..];

        if let Some(name) = tag.strip_prefix('#') {
            let name = name.trim();
            if name != ADMIN_SECTION {
                return Err(TemplateError::UnknownSection(name.to_string()));
            }
            sections.push((name, is_admin));
        } else if let Some(name) = tag.strip_prefix('/') {
            let name = name.trim();
            match sections.pop() {
                Some((open, _)) if open == name => {}
                _ => return Err(TemplateError::UnexpectedClose(name.to_string())),
            }
        } else {
            let value =
                lookup(tag).ok_or_else(|| TemplateError::UnknownPlaceholder(tag.to_string()))?;
            if emitting {
                output.push_str(&value);
            }
        }
    }

    if let Some((open, _)) = sections.pop() {
        return Err(TemplateError::Unclosed(open.to_string()));
    }
    output.push_str(rest);
    Ok(output)
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn lookup(name: &str) -> Option<Cow<'static, str>> {
        match name {
            "title" => Some(Cow::Borrowed("tux")),
            "message" => Some(Cow::Borrowed("<b>hi</b>")),
            _ => None,
        }
    }

    #[test]
    fn fills_placeholders_and_sections() {
        let source = "<h1>{{ title }}</h1>{{message}}{{#admin}}<form>{{title}}</form>{{/admin}}.";
        assert_eq!(
            fill_template(source, false, lookup).expect("render"),
            "<h1>tux</h1><b>hi</b>."
        );
        assert_eq!(
            fill_template(source, true, lookup).expect("render"),
            "<h1>tux</h1><b>hi</b><form>tux</form>."
        );
    }

    #[test]
    fn malformed_templates_are_errors() {
        assert!(matches!(
            fill_template("{{nope}}", true, lookup),
            Err(TemplateError::UnknownPlaceholder(_))
        ));
        assert!(matches!(
            fill_template("{{#admin}}x", true, lookup),
            Err(TemplateError::Unclosed(_))
        ));
        assert!(matches!(
            fill_template("x{{/admin}}", true, lookup),
            Err(TemplateError::UnexpectedClose(_))
        ));
        assert!(matches!(
            fill_template("{{#guest}}{{/guest}}", true, lookup),
            Err(TemplateError::UnknownSection(_))
        ));
        assert!(matches!(
            fill_template("{{title", true, lookup),
            Err(TemplateError::UnterminatedTag)
        ));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;"
        );
    }

    fn renderer(asset_dir: PathBuf) -> PageRenderer {
        let locale = Locale::load(
            &PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("locales"),
            "en",
        )
        .expect("locale");
        PageRenderer {
            template_path: asset_dir.join("page.html"),
            base_url: "/".into(),
            link_prefix: String::new(),
            style: "dark".into(),
            locale: Arc::new(locale),
        }
    }

    #[tokio::test]
    async fn renders_page_with_escaped_title() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("page.html"),
            "<title>{{title}}</title><link href=\"{{base_url}}?{{style}}\">{{message}}",
        )
        .expect("template");
        let page = PageContext {
            title: "<tux>",
            is_admin: false,
            folder: "",
        };
        let response = renderer(dir.path().to_path_buf())
            .render(StatusCode::NOT_FOUND, "<i>gone</i>", page)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(
            body,
            "<title>&lt;tux&gt;</title><link href=\"/?dark\"><i>gone</i>"
        );
    }

    #[tokio::test]
    async fn shipped_template_renders_admin_form() {
        let etc = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("etc");
        let page = PageContext {
            title: "admin",
            is_admin: true,
            folder: "docs/",
        };
        let mut renderer = renderer(etc);
        renderer.template_path.set_file_name("index.html");

        let response = renderer.render(StatusCode::OK, "<a href=\"/x\">x</a>", page).await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains("name=\"file\""));
        assert!(html.contains("<a href=\"/x\">x</a>"));
        assert!(html.contains("href=\"/?dark\""));
    }

    #[tokio::test]
    async fn missing_template_degrades_to_plain_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let page = PageContext {
            title: "tux",
            is_admin: false,
            folder: "",
        };
        let response = renderer(dir.path().to_path_buf())
            .render(StatusCode::OK, "listing", page)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            TEXT_CONTENT_TYPE
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(body, "The page template is broken.");
    }
}
