use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// 复制到本地（或挂载的共享）目录
    #[default]
    Local,
    /// 通过 `hdfs dfs -put` 写入HDFS
    Hdfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,
    /// Local: 存储根目录
    pub root_dir: String,
    /// Worker读取时使用的绝对路径前缀
    pub destination_prefix: String,
    /// Hdfs: hdfs 命令路径
    pub hdfs_command: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            root_dir: "storage".to_string(),
            destination_prefix: "/data/images".to_string(),
            hdfs_command: "hdfs".to_string(),
        }
    }
}

impl ConfigValidator for StorageConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(
            &self.destination_prefix,
            "storage.destination_prefix",
        )?;
        if !self.destination_prefix.starts_with('/') {
            return Err(crate::ConfigError::Validation(
                "storage.destination_prefix must be an absolute path".to_string(),
            ));
        }

        match self.kind {
            StorageKind::Local => {
                ValidationUtils::validate_not_empty(&self.root_dir, "storage.root_dir")?
            }
            StorageKind::Hdfs => {
                ValidationUtils::validate_not_empty(&self.hdfs_command, "storage.hdfs_command")?
            }
        }

        Ok(())
    }
}
