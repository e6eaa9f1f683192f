pub mod binding;
pub mod bus;
pub mod cache;
pub mod config;
pub mod module;
pub mod protocol;
