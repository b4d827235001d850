//! 用户名到加盐口令哈希的只读映射与校验。

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct CredentialStore {
    hashes: Arc<HashMap<String, String>>,
}

impl CredentialStore {
    pub fn new(hashes: HashMap<String, String>) -> Self {
        for (username, hash) in &hashes {
            if PasswordHash::new(hash).is_err() {
                warn!(username, "password hash is not a valid PHC string");
            }
        }
        Self {
            hashes: Arc::new(hashes),
        }
    }

    /// 校验口令；未知用户或哈希格式错误均视为失败。
    ///
    /// Argon2 计算在阻塞线程池上执行。
    pub async fn verify(&self, username: &str, password: &str) -> bool {
        let Some(hash) = self.hashes.get(username).cloned() else {
            return false;
        };
        let password = password.to_owned();
        match tokio::task::spawn_blocking(move || verify_hash(&hash, &password)).await {
            Ok(verified) => verified,
            Err(err) => {
                error!(error = %err, "password verification task failed");
                false
            }
        }
    }
}

fn verify_hash(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// 使用随机盐生成 Argon2id 哈希（PHC 字符串）。
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

/// 测试用的低成本参数；校验时参数从哈希中读取。
#[cfg(test)]
pub(crate) fn test_hash(password: &str) -> String {
    use argon2::{Algorithm, Params, Version};

    let params = Params::new(256, 1, 1, None).expect("argon2 params");
    let salt = SaltString::generate(&mut OsRng);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .expect("hash")
        .to_string()
}
