pub mod db;
pub mod knowledge;
pub mod models;
pub mod query;
pub mod schema;
pub mod search;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
