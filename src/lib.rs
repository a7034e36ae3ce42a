//! Offline caching controller for a storefront web app.
//!
//! Requests are classified and served through versioned cache tiers with a
//! strategy per request kind. Background sync drains deferred work once the
//! network is back, and push messages become notifications whose clicks are
//! routed to open pages.

pub mod cache;
pub mod clients;
pub mod config;
pub mod fetch;
pub mod http;
pub mod lifecycle;
pub mod network;
pub mod push;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testing;
