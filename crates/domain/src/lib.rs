//! Domain layer for the exchange-point access gateway: identifiers and
//! records, persistence and gateway contracts, configuration, and the
//! admission and payment services built on top of them.

pub mod config;
pub mod gateway;
pub mod model;
pub mod services;
pub mod storage;

pub use config::*;
pub use gateway::*;
pub use model::*;
pub use storage::*;
