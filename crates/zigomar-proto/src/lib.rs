pub mod candidates;
pub mod config;
pub mod error;
pub mod icy;
pub mod merge;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod state;
