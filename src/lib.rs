pub mod api;
pub mod channels;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod shutdown;
pub mod utils;
