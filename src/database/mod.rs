pub mod manager;
pub mod models;
pub mod query_builder;
pub mod repository;
pub mod resource;
pub mod validation;

pub use manager::{DatabaseError, DatabaseManager};
pub use repository::Repository;
pub use resource::Resource;
pub use validation::ValidationErrors;
