//! 上传写入用的临时文件：成功后原子替换目标，失败时清理。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标文件同目录创建隐藏的临时文件。
    pub async fn create(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "upload".into());
        let temp_path = parent.join(format!(".{base}.part.{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    pub async fn write_all(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await
    }

    pub async fn discard(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 刷盘后重命名为目标文件；已有同名文件会被替换。
    pub async fn commit(mut self) -> io::Result<u64> {
        let result: io::Result<u64> = async {
            self.file.flush().await?;
            self.file.sync_all().await?;
            let written = self.file.metadata().await?.len();
            fs::rename(&self.temp_path, &self.target).await?;
            Ok(written)
        }
        .await;
        if result.is_err() {
            let _ = fs::remove_file(&self.temp_path).await;
        }
        result
    }
}
