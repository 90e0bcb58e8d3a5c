//! Photo catalog service: uploads land in a blob store, their metadata in a
//! separate catalog index, and an upload coordinator keeps the two in step.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
