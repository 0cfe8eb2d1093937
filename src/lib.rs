pub mod arming;
pub mod board;
pub mod cli;
pub mod coordinator;
pub mod drag;
pub mod events;
pub mod geometry;
pub mod logging;
pub mod present;
pub mod settings;
pub mod store;
pub mod types;
