//! 封禁表的定期清理任务。

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::auth::AuthGate;

/// 启动封禁清理任务，按固定间隔移除过期封禁。
pub fn spawn_ban_sweeper(gate: Arc<AuthGate>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // 第一次 tick 立即完成
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = gate.sweep_expired_bans().await;
            info!(removed, "ban sweep done");
        }
    })
}
