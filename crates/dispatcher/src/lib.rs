//! 请求分发与后台事件转发
//!
//! `WorkDispatcher` 把分类任务发布到请求队列并等待Worker的响应；
//! `EventRelay` 在后台任务中消费进度队列，经 `LiveNotifier` 推送给实时订阅者。

pub mod event_relay;
pub mod notifier;
pub mod work_dispatcher;

pub use event_relay::*;
pub use notifier::*;
pub use work_dispatcher::*;
