pub mod client;
pub mod scheduler;
pub mod types;
