//! Record store client for Cadence.
//!
//! Scheduled posts live as rows in a remote table. This crate provides:
//!
//! - **Types**: the [`Record`] snapshot model and the [`Payload`] derived from it
//! - **Store trait**: [`RecordStore`], the two operations the scheduler needs
//! - **HTTP Client**: [`TableClient`], a REST table client with paging and retry
//! - **Memory store**: [`MemoryStore`], an in-process store for tests and dry runs

mod client;
mod error;
mod memory;
mod store;
mod types;

pub use client::TableClient;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::RecordStore;
pub use types::*;
