//! Core types and algorithms for the grid coordinator and table reader.
//!
//! `grid-server` wires these onto a tonic service; everything here is
//! transport-agnostic so it can be unit tested directly.

pub mod coordinator;
pub mod datafile;
pub mod error;
pub mod job;
pub mod job_runner;
pub mod materializer;
pub mod predicate;
pub mod query_engine;
pub mod table_registry;

pub use error::{GridError, Result};
