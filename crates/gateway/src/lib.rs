pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod connections;
pub mod cors;
pub mod coordinator;
pub mod state;
