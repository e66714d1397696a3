// src/sync/mod.rs
//! Distributed synchronization tools
//!
//! Classical concurrency primitives offered as services. Clients ask the
//! [`SynchronizerManager`] for access to a group's tool and then call the
//! tool directly through a port dedicated to them.
//!
//! - **Group**: encoded group identifiers
//! - **Contracts**: wire protocol of the tools and the manager
//! - **Tool**: component shell shared by the four primitives
//! - **Semaphore / Barrier / Latch / Queue**: the primitives
//! - **Manager**: tool registry and port broker
//! - **Client**: typed wrappers over outbound ports

pub mod barrier;
pub mod client;
pub mod contracts;
pub mod group;
pub mod latch;
pub mod manager;
pub mod queue;
pub mod semaphore;
pub mod tool;

pub use barrier::{CyclicBarrierService, CyclicBarrierTool};
pub use client::{
    ArrayBlockingQueueClient, CountDownLatchClient, CyclicBarrierClient, SemaphoreClient,
    SynchronizerManagerClient,
};
pub use contracts::ToolKind;
pub use group::GroupId;
pub use latch::{CountDownLatchService, CountDownLatchTool};
pub use manager::SynchronizerManager;
pub use queue::{ArrayBlockingQueueService, ArrayBlockingQueueTool};
pub use semaphore::{SemaphoreService, SemaphoreTool};
pub use tool::{ToolComponent, ToolService};
