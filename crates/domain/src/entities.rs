use classifier_errors::{ClassifierError, ClassifierResult};
use serde::{Deserialize, Serialize};

/// 发布到请求队列的分类任务
///
/// 线上格式为扁平JSON对象 `{"filename": ..., "hdfs_path": ...}`。
/// 字段私有，构造后不可修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    filename: String,
    #[serde(rename = "hdfs_path")]
    storage_path: String,
}

impl WorkItem {
    pub fn new(
        filename: impl Into<String>,
        storage_path: impl Into<String>,
    ) -> ClassifierResult<Self> {
        let item = Self {
            filename: filename.into(),
            storage_path: storage_path.into(),
        };
        item.validate()?;
        Ok(item)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }

    pub fn validate(&self) -> ClassifierResult<()> {
        if self.filename.trim().is_empty() {
            return Err(ClassifierError::validation_error("filename不能为空"));
        }
        if self.storage_path.trim().is_empty() {
            return Err(ClassifierError::validation_error("hdfs_path不能为空"));
        }
        Ok(())
    }

    pub fn to_wire(&self) -> ClassifierResult<Vec<u8>> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_wire(data: &[u8]) -> ClassifierResult<Self> {
        let item: WorkItem = serde_json::from_slice(data)?;
        item.validate()?;
        Ok(item)
    }
}

/// 消息代理投递的原始消息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerMessage {
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl BrokerMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Worker返回的分类结果，payload由调用方解释
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseMessage {
    pub payload: String,
    #[serde(skip)]
    pub correlation_id: Option<String>,
}

impl TryFrom<BrokerMessage> for ResponseMessage {
    type Error = ClassifierError;

    fn try_from(message: BrokerMessage) -> ClassifierResult<Self> {
        let payload = String::from_utf8(message.body).map_err(|e| {
            ClassifierError::Serialization(format!("响应消息不是有效的UTF-8: {e}"))
        })?;
        Ok(Self {
            payload,
            correlation_id: message.correlation_id,
        })
    }
}

/// 模型调优进度事件，原样转发给实时订阅者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
}

impl From<&BrokerMessage> for ProgressEvent {
    fn from(message: &BrokerMessage) -> Self {
        Self {
            message: String::from_utf8_lossy(&message.body).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_wire_format() {
        let item = WorkItem::new("cat.jpg", "/data/images/cat.jpg").unwrap();
        let wire = item.to_wire().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&wire).unwrap();

        assert_eq!(
            value,
            serde_json::json!({"filename": "cat.jpg", "hdfs_path": "/data/images/cat.jpg"})
        );
    }

    #[test]
    fn test_work_item_round_trip_is_stable() {
        let items = [
            WorkItem::new("cat.jpg", "/data/images/cat.jpg").unwrap(),
            WorkItem::new("日本語.png", "/data/images/日本語.png").unwrap(),
            WorkItem::new("quote\"d.jpg", "/data/images/quote\"d.jpg").unwrap(),
        ];

        for item in items {
            let first = item.to_wire().unwrap();
            let second = WorkItem::from_wire(&first).unwrap().to_wire().unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_work_item_rejects_empty_fields() {
        assert!(WorkItem::new("", "/data/images/cat.jpg").is_err());
        assert!(WorkItem::new("cat.jpg", "  ").is_err());
        assert!(WorkItem::from_wire(br#"{"filename":"","hdfs_path":"/x"}"#).is_err());
        assert!(WorkItem::from_wire(br#"{"filename":"a.jpg"}"#).is_err());
    }

    #[test]
    fn test_response_message_from_delivery() {
        let delivery = BrokerMessage::new("class=1").with_correlation_id("abc");
        let response = ResponseMessage::try_from(delivery).unwrap();

        assert_eq!(response.payload, "class=1");
        assert_eq!(response.correlation_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_response_message_rejects_invalid_utf8() {
        let delivery = BrokerMessage::new(vec![0xff, 0xfe]);
        assert!(matches!(
            ResponseMessage::try_from(delivery),
            Err(ClassifierError::Serialization(_))
        ));
    }

    #[test]
    fn test_progress_event_is_verbatim() {
        let delivery = BrokerMessage::new("Model tuning completed");
        let event = ProgressEvent::from(&delivery);
        assert_eq!(event.message, "Model tuning completed");
    }
}
