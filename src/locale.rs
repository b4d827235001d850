//! 界面文案表：从 `<locales>/<lang>.json` 加载。

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocaleError {
    #[error("cannot read locale {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid locale {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// 本地化文案；所有键均为必填。
#[derive(Debug, Clone, Deserialize)]
pub struct Locale {
    pub unauthorized: String,
    pub logged_out: String,
    upload_too_large: String,
    pub upload_malformed: String,
    path_denied: String,
    pub create_failed: String,
    pub write_failed: String,
    pub read_failed: String,
    pub template_error: String,
    pub home_link: String,
    pub logout_link: String,
    pub upload_button: String,
    pub delete_link: String,
}

impl Locale {
    pub fn load(dir: &Path, lang: &str) -> Result<Self, LocaleError> {
        let path = dir.join(format!("{lang}.json"));
        let raw = std::fs::read(&path).map_err(|source| LocaleError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| LocaleError::Parse { path, source })
    }

    pub fn upload_too_large(&self, limit: u64) -> String {
        self.upload_too_large.replace("{limit}", &limit.to_string())
    }

    pub fn path_denied(&self, path: &str) -> String {
        self.path_denied.replace("{path}", path)
    }
}
