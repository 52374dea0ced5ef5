pub mod factory;
pub mod in_memory_broker;
pub mod rabbitmq;
pub mod storage;

pub use factory::*;
pub use in_memory_broker::InMemoryBroker;
pub use rabbitmq::RabbitMqTransport;
pub use storage::{HdfsCommandStorage, LocalStorage};
