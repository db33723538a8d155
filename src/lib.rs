pub mod conf;
pub mod provision;
pub mod reconcile;
pub mod schema;
pub mod utils;
