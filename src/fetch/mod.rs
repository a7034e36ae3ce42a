//! Request routing and the fetch strategies behind it.
//!
//! Every same-origin GET goes through `classify` and then through one of the
//! four strategies of `StrategyExecutor`. When both network and cache come up
//! empty, `fallback` supplies a stand-in body.

mod classify;
pub mod fallback;
mod strategy;

pub use classify::{classify, Route};
pub use strategy::{within_ttl, ResponseSource, Served, StrategyExecutor, CACHED_AT_HEADER};
