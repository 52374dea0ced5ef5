pub mod entities;
pub mod messaging;
pub mod storage;
pub mod topology;
pub mod value_objects;

pub use classifier_errors::{ClassifierError, ClassifierResult};
pub use entities::*;
pub use messaging::*;
pub use storage::*;
pub use topology::*;
pub use value_objects::*;
