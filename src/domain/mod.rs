// Brokerage data model
pub mod account;
pub mod holdings;
pub mod order;
pub mod quote;

// Login negotiation
pub mod auth;

// Browser automation vocabulary
pub mod browser;
pub mod selector;

// Intercepted payload envelopes and tolerant decoding
pub mod envelope;
pub mod lenient;

// Port interfaces
pub mod ports;

// Domain-specific error types
pub mod errors;
