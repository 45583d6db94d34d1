pub mod models;
pub mod repository;
pub mod transaction;

pub use repository::*;
pub use transaction::WriteTransaction;
