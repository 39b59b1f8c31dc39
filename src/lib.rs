pub mod analyzer;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod logging;
pub mod runs;
pub mod scorer;
