pub mod clients;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod log_sink;
pub mod logging;
pub mod queue;
pub mod rwlock;
pub mod server;
pub mod signals;
pub mod store;
pub mod wake;
pub mod wire;
pub mod worker;
