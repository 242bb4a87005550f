pub mod db;
pub mod errors;
pub mod helpers;
pub mod query_params;
pub mod static_server;
pub mod store;
