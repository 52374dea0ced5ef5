//! # Classifier Testing Utils
//!
//! 各crate测试共用的工具：
//!
//! - **WorkerStub**: 模拟Worker池，消费请求队列并按约定回复
//! - **Mock Storage**: 记录调用或固定失败的存储实现
//! - **Test Containers**: RabbitMQ测试容器（需要Docker）
//! - **Builders / Helpers**: 测试配置构建和异步等待工具
//!
//! ```toml
//! [dev-dependencies]
//! classifier-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;
pub mod worker_stub;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
pub use worker_stub::*;
