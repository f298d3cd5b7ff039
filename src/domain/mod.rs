pub mod embedding;
pub mod feed_service;
pub mod maintenance;
pub mod models;
pub mod recommend;
pub mod tasks;
pub mod user_service;
