pub mod batch;
pub mod client;
pub mod location;
pub mod log;
