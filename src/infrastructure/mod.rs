pub mod cdp;
pub mod core;
pub mod mock;
pub mod observability;
pub mod order_gateway;
pub mod profile_store;

pub use order_gateway::HttpOrderGateway;
pub use profile_store::{ProfileLease, ProfileStore};
