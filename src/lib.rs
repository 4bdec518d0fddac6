pub mod broker;
pub mod config;
pub mod error;
pub mod gateway;
pub mod shutdown;
pub mod store;
pub mod watchdog;
pub mod worker;
