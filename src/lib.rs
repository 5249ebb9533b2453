//! Depot - local artifact cache with lazy mirroring
//!
//! Build tools ask for artifacts by key. Depot serves them from a local
//! store and, on a miss, mirrors them from remote repositories, preferring
//! a compact derived format when the remote offers one.

pub mod artifact;
pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod mirror;
pub mod store;
pub mod ui;

pub use error::{DepotError, DepotResult};
