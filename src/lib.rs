pub mod cascade;
pub mod config;
pub mod gateway;
pub mod notify;
pub mod output;
pub mod plan;
pub mod queue;
pub mod server;
pub mod store;
