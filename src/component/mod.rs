// src/component/mod.rs
//! Components: independently scheduled units of computation
//!
//! - **Contract**: typed service protocol carried by ports
//! - **Core**: identity, declared contracts, owned ports, lifecycle state
//! - **Executor**: serialized or bounded-parallel task execution, delayed
//!   and periodic scheduling
//! - **Failure Log**: where asynchronous failures are reported
//! - **Lifecycle**: the `Component` trait and `ComponentHandle` driver
//! - **URI**: globally unique identifiers for components and ports

pub mod contract;
pub mod core;
pub mod executor;
pub mod failure_log;
pub mod lifecycle;
pub mod uri;

// Re-export commonly used types
pub use self::core::ComponentCore;
pub use contract::{DispatchMode, ServiceContract};
pub use executor::{ComponentExecutor, ScheduledTask};
pub use failure_log::{ComponentFailure, FailureLog, FailureOrigin};
pub use lifecycle::{Component, ComponentHandle, LifecycleState, PlainComponent};
