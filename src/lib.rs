pub mod allocator;
pub mod artifacts;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod render;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod settings;
pub mod state;
pub mod storage;
pub mod swap;
pub mod visibility;
pub mod workers;

pub use workers::Worker;
