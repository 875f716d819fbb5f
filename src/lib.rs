//! A small RESP2 key-value server with string values, lists and a blocking
//! list pop.

mod blocking;
pub mod commands;
pub mod config;
pub mod list;
pub mod resp;
pub mod server;
pub mod store;
