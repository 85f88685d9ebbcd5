pub mod cache;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod relay;
