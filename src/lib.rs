pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod retry;
pub mod services;
pub mod store;
pub mod tracker;
