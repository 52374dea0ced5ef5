use std::path::{Path, PathBuf};

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Extension, Json,
};
use classifier_domain::{
    destination_path, ClassifierError, StorageBackend, StoredObject, WorkItem,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;

/// multipart中携带图片的字段名
pub const UPLOAD_FIELD: &str = "file";

struct Upload {
    filename: String,
    data: axum::body::Bytes,
}

/// 上传图片，转存后分发给Worker池，并同步返回分类结果
#[instrument(skip_all)]
pub async fn predict(
    State(state): State<AppState>,
    user: Option<Extension<AuthenticatedUser>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<Value>> {
    let caller = user.map(|Extension(user)| user.subject);
    info!(caller = caller.as_deref().unwrap_or("anonymous"), "收到预测请求");

    let mut multipart = multipart.map_err(|e| {
        warn!("无法解析上传请求: {e}");
        ApiError::bad_request("No file part")
    })?;

    let upload = read_upload(&mut multipart).await?;
    let filename = sanitize_filename(&upload.filename)
        .ok_or_else(|| ApiError::bad_request("Invalid filename"))?;

    let local_path = save_upload(&state.upload_dir, &filename, &upload.data).await?;
    let destination = destination_path(&state.destination_prefix, &filename);
    let stored = store_upload(state.storage.as_ref(), &local_path, &destination).await?;

    let work_item = WorkItem::new(&filename, stored.path)?;
    let response = state.dispatcher.dispatch(&work_item).await?;

    info!(
        filename = %filename,
        caller = caller.as_deref().unwrap_or("anonymous"),
        "预测完成"
    );
    Ok(Json(json!({ "Result": response.payload })))
}

async fn read_upload(multipart: &mut Multipart) -> ApiResult<Upload> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("读取上传内容失败: {e}");
        ApiError::bad_request("Malformed upload")
    })? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(ApiError::bad_request("No selected file"));
        }

        let data = field.bytes().await.map_err(|e| {
            warn!("读取上传文件失败: {e}");
            ApiError::bad_request("Malformed upload")
        })?;
        return Ok(Upload { filename, data });
    }

    Err(ApiError::bad_request("No file part"))
}

/// 只保留文件名部分，字符限定为 `[A-Za-z0-9._-]`，空白替换为下划线
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let basename = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = basename
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// 暂存文件名带随机前缀，避免并发上传同名文件时互相覆盖
async fn save_upload(upload_dir: &Path, filename: &str, data: &[u8]) -> ApiResult<PathBuf> {
    tokio::fs::create_dir_all(upload_dir).await.map_err(|e| {
        ClassifierError::storage_failed(format!(
            "创建上传目录 {} 失败: {e}",
            upload_dir.display()
        ))
    })?;

    let local_path = upload_dir.join(format!("{}_{filename}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&local_path, data).await.map_err(|e| {
        ClassifierError::storage_failed(format!(
            "保存上传文件 {} 失败: {e}",
            local_path.display()
        ))
    })?;
    Ok(local_path)
}

async fn store_upload(
    storage: &dyn StorageBackend,
    local_path: &Path,
    destination: &str,
) -> ApiResult<StoredObject> {
    let stored = storage.put(local_path, destination).await?;

    if let Err(e) = tokio::fs::remove_file(local_path).await {
        warn!("删除本地暂存文件 {} 失败: {e}", local_path.display());
    }
    info!(
        backend = storage.name(),
        destination = %stored.path,
        "上传文件已转存"
    );
    Ok(stored)
}
