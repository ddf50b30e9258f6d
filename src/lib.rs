pub mod config;
pub mod graceful_shutdown;
pub mod health;
pub mod json_util;
pub mod latest;
pub mod normalize;
pub mod ordering;
pub mod poller;
pub mod reconcile;
pub mod timestamps;
pub mod types;
pub mod upstream;
