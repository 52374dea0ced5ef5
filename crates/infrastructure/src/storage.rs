use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use classifier_domain::{StorageBackend, StoredObject};
use classifier_errors::{ClassifierError, ClassifierResult};
use tokio::process::Command;
use tracing::{debug, info};

/// 把文件复制到本地目录，`destination_path` 映射到 `root` 之下
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 目标路径中的 `..` 和根目录前缀会被忽略，结果始终位于 `root` 内
    fn resolve(&self, destination_path: &str) -> ClassifierResult<PathBuf> {
        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(destination_path).components() {
            if let Component::Normal(part) = component {
                resolved.push(part);
                depth += 1;
            }
        }
        if depth == 0 {
            return Err(ClassifierError::storage_failed(format!(
                "无效的目标路径: {destination_path}"
            )));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn put(
        &self,
        local_path: &Path,
        destination_path: &str,
    ) -> ClassifierResult<StoredObject> {
        let target = self.resolve(destination_path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ClassifierError::storage_failed(format!(
                    "创建目录 {} 失败: {e}",
                    parent.display()
                ))
            })?;
        }

        tokio::fs::copy(local_path, &target).await.map_err(|e| {
            ClassifierError::storage_failed(format!(
                "复制 {} 到 {} 失败: {e}",
                local_path.display(),
                target.display()
            ))
        })?;

        debug!("文件已保存到 {}", target.display());
        Ok(StoredObject {
            path: destination_path.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// 通过 `hdfs dfs -put -f` 上传到HDFS
pub struct HdfsCommandStorage {
    command: String,
}

impl HdfsCommandStorage {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl StorageBackend for HdfsCommandStorage {
    async fn put(
        &self,
        local_path: &Path,
        destination_path: &str,
    ) -> ClassifierResult<StoredObject> {
        let output = Command::new(&self.command)
            .arg("dfs")
            .arg("-put")
            .arg("-f")
            .arg(local_path)
            .arg(destination_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ClassifierError::storage_failed(format!("执行 {} 失败: {e}", self.command))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClassifierError::storage_failed(format!(
                "上传 {} 到HDFS失败 ({}): {}",
                local_path.display(),
                output.status,
                stderr.trim()
            )));
        }

        info!("文件已上传到HDFS: {}", destination_path);
        Ok(StoredObject {
            path: destination_path.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "hdfs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage_copies_under_root() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("upload.jpg");
        tokio::fs::write(&source, b"image-bytes").await.unwrap();

        let storage = LocalStorage::new(temp_dir.path().join("shared"));
        let stored = storage.put(&source, "/data/images/cat.jpg").await.unwrap();

        assert_eq!(stored.path, "/data/images/cat.jpg");
        let copied = temp_dir.path().join("shared/data/images/cat.jpg");
        assert_eq!(tokio::fs::read(copied).await.unwrap(), b"image-bytes");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_local_storage_stays_inside_root() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path().join("shared"));

        let resolved = storage.resolve("/../../etc/passwd").unwrap();
        assert!(resolved.starts_with(temp_dir.path().join("shared")));
        assert!(storage.resolve("/").is_err());
    }

    #[tokio::test]
    async fn test_local_storage_missing_source_fails() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        let result = storage
            .put(&temp_dir.path().join("missing.jpg"), "/data/images/missing.jpg")
            .await;
        assert!(matches!(result, Err(ClassifierError::StorageFailed(_))));
    }

    #[tokio::test]
    async fn test_hdfs_storage_missing_command_fails() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("upload.jpg");
        tokio::fs::write(&source, b"image-bytes").await.unwrap();

        let storage = HdfsCommandStorage::new("/nonexistent/bin/hdfs");
        let result = storage.put(&source, "/data/images/cat.jpg").await;
        assert!(matches!(result, Err(ClassifierError::StorageFailed(_))));
    }
}
