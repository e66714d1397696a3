// src/component/contract.rs
//! Service contracts
//!
//! A contract is the typed wire protocol carried by a port: one request
//! type and one response type, usually enums with a variant per operation.
//! Whether an operation is executed synchronously or fire-and-forget is part
//! of the contract and is decided per request variant, never per call.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// How an inbound port executes a request on its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Caller waits for the result
    Sync,
    /// Request is queued; the caller gets no result
    Async,
}

/// A service contract offered or required by components
pub trait ServiceContract: Send + Sync + 'static {
    /// Globally unique contract identifier
    const ID: &'static str;

    type Request: Serialize + DeserializeOwned + Debug + Send + 'static;
    type Response: Serialize + DeserializeOwned + Debug + Send + 'static;

    /// Dispatch mode of `request`
    fn dispatch_mode(_request: &Self::Request) -> DispatchMode {
        DispatchMode::Sync
    }
}
