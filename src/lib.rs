pub mod api;
pub mod backend;
pub mod bus;
pub mod config;
pub mod error;
pub mod gateway;
pub mod geo;
pub mod location;
pub mod matching;
pub mod models;
pub mod observability;
pub mod spatial;
pub mod state;
