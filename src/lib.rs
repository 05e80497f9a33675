pub mod config;
pub mod db;
pub mod graph;
pub mod ids;
pub mod models;
pub mod schema;
pub mod slug;
pub mod store;
pub mod supersession;
pub mod validation;
