//! Option pricing and paper trading on a simulated ice-cream flavor market.
//!
//! The kernel (`models`, `market`, `paper`) is synchronous and deterministic.
//! The session runner (`state`, `db`, `server`) wires it to tokio, SQLite and axum.

pub mod config;
pub mod db;
pub mod errors;
pub mod market;
pub mod models;
pub mod paper;
pub mod server;
pub mod state;
