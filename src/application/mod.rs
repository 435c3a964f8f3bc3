// Login state machine and caller API
pub mod session;

// Intercepted-response retrieval
pub mod fetcher;
pub mod readers;
pub mod retry;

// Order submission
pub mod order_api;
pub mod order_workflow;
