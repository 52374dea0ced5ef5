//! 存储协作方的测试替身

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use classifier_domain::{ClassifierError, ClassifierResult, StorageBackend, StoredObject};

/// 记录每次put调用，并保存当时的文件内容
#[derive(Debug, Default)]
pub struct RecordingStorage {
    puts: Mutex<Vec<RecordedPut>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPut {
    pub local_path: PathBuf,
    pub destination_path: String,
    pub contents: Vec<u8>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puts(&self) -> Vec<RecordedPut> {
        self.puts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.puts.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageBackend for RecordingStorage {
    async fn put(
        &self,
        local_path: &Path,
        destination_path: &str,
    ) -> ClassifierResult<StoredObject> {
        let contents = tokio::fs::read(local_path).await?;
        if let Ok(mut puts) = self.puts.lock() {
            puts.push(RecordedPut {
                local_path: local_path.to_path_buf(),
                destination_path: destination_path.to_string(),
                contents,
            });
        }
        Ok(StoredObject {
            path: destination_path.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// 每次put都失败
#[derive(Debug, Default)]
pub struct FailingStorage;

#[async_trait]
impl StorageBackend for FailingStorage {
    async fn put(
        &self,
        _local_path: &Path,
        destination_path: &str,
    ) -> ClassifierResult<StoredObject> {
        Err(ClassifierError::storage_failed(format!(
            "模拟存储故障: {destination_path}"
        )))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
