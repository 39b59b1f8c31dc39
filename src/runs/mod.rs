//! Run lifecycle: persistence, the state machine, the worker pool that
//! drives runs through clone → analyze → score, and the HTTP surface.

pub mod api;
pub mod db;
pub mod models;
pub mod server;
pub mod state;
pub mod store;
pub mod worker;
pub mod workspace;
