use std::path::Path;

use async_trait::async_trait;
use classifier_errors::ClassifierResult;

/// 已写入共享存储的对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
}

/// 共享存储，Worker从这里读取待分类的图片
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// 把本地文件放到 `destination_path`，已存在时覆盖
    async fn put(&self, local_path: &Path, destination_path: &str)
        -> ClassifierResult<StoredObject>;

    fn name(&self) -> &'static str;
}

/// 目标路径 = 前缀 + 文件名，处理前缀末尾的斜杠
pub fn destination_path(prefix: &str, filename: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    format!("{prefix}/{filename}")
}
