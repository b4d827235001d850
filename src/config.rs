//! 命令行参数、配置文件加载与时长解析。

use clap::Parser;
use serde::{Deserialize, Deserializer};
use shadow_rs::formatcp;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_CONFIG_PATH: &str = "etc/config.json";
pub const DEFAULT_LOCALES_DIR: &str = "locales";
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const AUTH_REALM: &str = r#"Basic realm="Restricted""#;
pub const LOGOUT_MARKER: &str = "logout";
pub const DELETE_MARKER: &str = "delete";
pub const UPLOAD_FIELD: &str = "file";
pub const PLACEHOLDER_EXTENSION: &str = "nix";
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "filegate", version = VERSION_INFO, about = "Confined file server")]
pub struct Args {
    #[arg(
        short = 'c',
        long,
        env = "FILEGATE_CONFIG",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path of the JSON config file; its directory holds template, styles and log"
    )]
    pub config: PathBuf,
    #[arg(
        short = 'l',
        long,
        env = "FILEGATE_LOCALES",
        default_value = DEFAULT_LOCALES_DIR,
        help = "Directory with <lang>.json string tables"
    )]
    pub locales_dir: PathBuf,
    #[arg(help = "Print the salted hash of this password and exit")]
    pub password: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("check_duration must be greater than zero")]
    ZeroSweepInterval,
    #[error("upload_max must be greater than zero")]
    ZeroUploadLimit,
    #[error("base_url must start with '/', got {0:?}")]
    InvalidBaseUrl(String),
}

/// 服务配置（启动后只读）。
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data_folder: PathBuf,
    #[serde(default)]
    pub log_file: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub link_prefix: String,
    pub style: String,
    pub template: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    pub port: u16,
    pub admin_user: String,
    pub lang: String,
    pub upload_max: u64,
    pub max_failed: u32,
    #[serde(rename = "block_duration", deserialize_with = "deserialize_duration")]
    pub ban_duration: Duration,
    #[serde(rename = "check_duration", deserialize_with = "deserialize_duration")]
    pub sweep_interval: Duration,
    #[serde(default)]
    pub users: HashMap<String, String>,
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

impl Config {
    /// 从 JSON 文件加载并校验配置。
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.upload_max == 0 {
            return Err(ConfigError::ZeroUploadLimit);
        }
        if !self.base_url.starts_with('/') {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }
        Ok(())
    }
}

/// 配置文件所在目录，模板、样式与日志文件均相对于该目录。
pub fn asset_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_duration(&value).map_err(serde::de::Error::custom)
}

/// 解析带单位的时长（ms/s/m/h/d，可组合如 `1h30m`），纯数字按分钟处理。
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim().to_ascii_lowercase();
    if text.is_empty() {
        return Err("empty duration".into());
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        let minutes: u64 = text
            .parse()
            .map_err(|_| format!("duration out of range: {input:?}"))?;
        return minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: {input:?}"));
    }

    let mut total = Duration::ZERO;
    let mut rest = text.as_str();
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(format!("expected a number in duration {input:?}"));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("duration out of range: {input:?}"))?;
        rest = &rest[digits..];
        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];
        let part = match unit {
            "ms" => Some(Duration::from_millis(amount)),
            "s" => Some(Duration::from_secs(amount)),
            "m" => amount.checked_mul(60).map(Duration::from_secs),
            "h" => amount.checked_mul(60 * 60).map(Duration::from_secs),
            "d" => amount.checked_mul(24 * 60 * 60).map(Duration::from_secs),
            "" => return Err(format!("missing unit in duration {input:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {input:?}")),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("duration out of range: {input:?}"))?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_unit_bearing_durations() {
        assert_eq!(parse_duration("30m"), Ok(Duration::from_secs(30 * 60)));
        assert_eq!(parse_duration("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(2 * 3600)));
        assert_eq!(parse_duration("1d"), Ok(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(
            parse_duration("1h30m"),
            Ok(Duration::from_secs(3600 + 30 * 60))
        );
    }

    #[test]
    fn bare_number_means_minutes() {
        assert_eq!(parse_duration("5"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration(" 30 "), Ok(Duration::from_secs(1800)));
    }

    #[test]
    fn rejects_unknown_or_missing_units() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("1h30").is_err());
        assert!(parse_duration("30us").is_err());
        assert!(parse_duration("-5m").is_err());
    }

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        file.write_all(body.as_bytes()).expect("write config");
        file
    }

    const VALID: &str = r#"{
        "data_folder": "data",
        "base_url": "/",
        "style": "dark",
        "template": "index.html",
        "port": 8080,
        "admin_user": "admin",
        "lang": "en",
        "upload_max": 1048576,
        "max_failed": 3,
        "block_duration": "30m",
        "check_duration": "5m",
        "users": { "admin": "$argon2id$v=19$m=256,t=1,p=1$c2FsdHNhbHQ$aGFzaA" }
    }"#;

    #[test]
    fn loads_config_with_defaults() {
        let file = write_config(VALID);
        let config = Config::load(file.path()).expect("config loads");
        assert_eq!(config.ban_duration, Duration::from_secs(1800));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.link_prefix, "");
        assert_eq!(config.bind, DEFAULT_BIND);
        assert!(config.log_file.is_none());
        assert!(!config.trust_forwarded_for);
        assert!(config.users.contains_key("admin"));
    }

    #[test]
    fn invalid_duration_is_fatal() {
        let file = write_config(&VALID.replace(r#""30m""#, r#""thirty""#));
        let err = Config::load(file.path()).expect_err("bad duration rejected");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let file = write_config(&VALID.replace(r#""5m""#, r#""0s""#));
        let err = Config::load(file.path()).expect_err("zero interval rejected");
        assert!(matches!(err, ConfigError::ZeroSweepInterval));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = Config::load(Path::new("/nonexistent/filegate.json")).expect_err("missing");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn shipped_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = Config::load(&path).expect("shipped config");
        assert_eq!(config.log_file.as_deref(), Some("filegate.log"));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn asset_dir_is_config_parent() {
        assert_eq!(asset_dir(Path::new("etc/config.json")), PathBuf::from("etc"));
        assert_eq!(asset_dir(Path::new("config.json")), PathBuf::from("."));
    }
}
