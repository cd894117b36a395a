pub mod central;
pub mod connection;
pub mod constants;
pub mod session;
pub mod types;
