pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod media;
pub mod model;
pub mod pipeline;
pub mod references;
pub mod scheduler;
pub mod store;
