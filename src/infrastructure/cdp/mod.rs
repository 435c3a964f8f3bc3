//! Chrome driven over the DevTools protocol.

mod connection;
mod launcher;
mod page;

pub use connection::{CdpConnection, CdpEvent};
pub use page::CdpPage;
