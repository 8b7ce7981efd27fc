pub mod api;
pub mod config;
pub mod error;
pub mod geo;
pub mod models;
pub mod notify;
pub mod observability;
pub mod realtime;
pub mod reporter;
pub mod roster;
pub mod state;
pub mod storage;
