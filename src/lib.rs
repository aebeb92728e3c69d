pub mod config;
pub mod demo;
pub mod resource;
pub mod scenario;
pub mod transaction;
