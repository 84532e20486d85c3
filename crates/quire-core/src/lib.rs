//! quire-core
//!
//! Persistent generation-job queue with lease-based claiming and a
//! checkpointed four-stage pipeline executor.
//!
//! # Modules
//! - **domain**: task record, status, stages, checkpoint, article, errors
//! - **ports**: TaskStore, catalog sources, GenerationClient, Clock, IdGenerator
//! - **queue**: enqueue / claim / keep_alive / complete / fail
//! - **pipeline**: stage execution with heartbeat and checkpointing
//! - **app**: AppBuilder and the drain loop
//! - **impls**: in-memory, SQLite and offline implementations of the ports

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod queue;

#[cfg(test)]
mod testing;
