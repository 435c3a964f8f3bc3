pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::session::BrokerSession;
pub use config::Config;
