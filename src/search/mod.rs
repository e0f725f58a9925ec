pub mod library;
pub mod query;
