pub mod models;
pub mod pii;

pub use models::events::{DomainEvent, EventType};
pub use pii::Masked;
