//! Authentication for both sides of the gateway: API keys guard the
//! publisher surface, tickets admit subscriber WebSockets, and the identity
//! provider is the external authority tickets are delegated to.
pub mod api_key;
pub mod identity;
pub mod ticket;
