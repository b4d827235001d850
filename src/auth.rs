//! 认证闸门：口令校验、按来源 IP 的失败计数与定时封禁。

use chrono::Local;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;

/// Basic 认证中携带的用户名与口令。
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// 校验通过后的请求身份，每次请求重新推导。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Banned,
    Unauthorized,
    Admitted(Identity),
}

/// 失败计数与封禁表；同一 IP 不会同时出现在两张表中。
#[derive(Debug, Default)]
pub struct SecurityState {
    failures: HashMap<IpAddr, u32>,
    bans: HashMap<IpAddr, Instant>,
}

impl SecurityState {
    pub fn is_banned(&self, ip: IpAddr, now: Instant) -> bool {
        self.bans.get(&ip).is_some_and(|until| now < *until)
    }

    /// 记录一次失败；超过阈值时移除计数并写入封禁，返回封禁截止时间。
    pub fn record_failure(
        &mut self,
        ip: IpAddr,
        now: Instant,
        max_failed: u32,
        ban_duration: Duration,
    ) -> Option<Instant> {
        match self.bans.get(&ip) {
            // 封禁检查之后被并发请求封禁
            Some(until) if now < *until => return None,
            Some(_) => {
                self.bans.remove(&ip);
            }
            None => {}
        }

        let failures = self.failures.entry(ip).or_insert(0);
        *failures = failures.saturating_add(1);
        if *failures <= max_failed {
            return None;
        }

        self.failures.remove(&ip);
        let until = now + ban_duration;
        self.bans.insert(ip, until);
        Some(until)
    }

    /// 移除所有已过期的封禁，返回移除数量。
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.bans.len();
        self.bans.retain(|ip, until| {
            let keep = now < *until;
            if !keep {
                info!(client_ip = %ip, "ban expired, address released");
            }
            keep
        });
        before - self.bans.len()
    }

    pub fn failures(&self, ip: IpAddr) -> u32 {
        self.failures.get(&ip).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub fn ban_expiry(&self, ip: IpAddr) -> Option<Instant> {
        self.bans.get(&ip).copied()
    }

    #[cfg(test)]
    pub(crate) fn insert_ban(&mut self, ip: IpAddr, until: Instant) {
        self.failures.remove(&ip);
        self.bans.insert(ip, until);
    }
}

#[derive(Debug)]
pub struct AuthGate {
    store: CredentialStore,
    admin_user: String,
    max_failed: u32,
    ban_duration: Duration,
    state: Mutex<SecurityState>,
}

impl AuthGate {
    pub fn new(
        store: CredentialStore,
        admin_user: String,
        max_failed: u32,
        ban_duration: Duration,
    ) -> Self {
        Self {
            store,
            admin_user,
            max_failed,
            ban_duration,
            state: Mutex::new(SecurityState::default()),
        }
    }

    /// 判定请求：封禁中、未授权（计入失败）或放行并给出身份。
    ///
    /// 登录成功不会清零之前的失败次数，它们仍会累计到后续封禁。
    /// 锁只在访问表时持有，口令哈希计算期间不持锁。
    pub async fn admit(&self, ip: IpAddr, credentials: Option<Credentials>) -> Admission {
        if self.state.lock().await.is_banned(ip, Instant::now()) {
            debug!(client_ip = %ip, "request from banned address dropped");
            return Admission::Banned;
        }

        let verified = match &credentials {
            Some(credentials) => {
                self.store
                    .verify(&credentials.username, &credentials.password)
                    .await
            }
            None => false,
        };

        let Some(Credentials { username, .. }) = credentials.filter(|_| verified) else {
            self.register_failure(ip).await;
            return Admission::Unauthorized;
        };

        let is_admin = username == self.admin_user;
        Admission::Admitted(Identity { username, is_admin })
    }

    async fn register_failure(&self, ip: IpAddr) {
        let mut state = self.state.lock().await;
        let banned_until =
            state.record_failure(ip, Instant::now(), self.max_failed, self.ban_duration);
        let failures = state.failures(ip);
        drop(state);

        match banned_until {
            Some(_) => warn!(
                client_ip = %ip,
                banned_until = %wall_clock_after(self.ban_duration),
                "too many failed logins, address banned"
            ),
            None => warn!(client_ip = %ip, failures, "unauthorized request"),
        }
    }

    /// 清理过期封禁，供后台清理任务调用。
    pub async fn sweep_expired_bans(&self) -> usize {
        self.state.lock().await.sweep(Instant::now())
    }

    #[cfg(test)]
    pub(crate) async fn with_state<R>(&self, f: impl FnOnce(&mut SecurityState) -> R) -> R {
        f(&mut *self.state.lock().await)
    }
}

fn wall_clock_after(duration: Duration) -> String {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| Local::now().checked_add_signed(delta))
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
