// src/cvm/registry.rs
//! Published-port and component-factory registries

use crate::component::contract::ServiceContract;
use crate::component::lifecycle::ComponentHandle;
use crate::cvm::Cvm;
use crate::port::inbound::{InboundPort, WireEndpoint};
use crate::utils::errors::{CvmError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A port reachable through the deployment context
#[derive(Clone)]
pub struct PublishedPort {
    pub(crate) contract_id: &'static str,
    pub(crate) remote_visible: bool,
    pub(crate) typed: Arc<dyn Any + Send + Sync>,
    pub(crate) wire: Arc<dyn WireEndpoint>,
}

impl PublishedPort {
    pub(crate) fn new<C: ServiceContract>(port: Arc<InboundPort<C>>, remote_visible: bool) -> Self {
        Self {
            contract_id: C::ID,
            remote_visible,
            typed: port.clone(),
            wire: port,
        }
    }

    /// Typed port, if it carries contract `C`
    pub(crate) fn downcast<C: ServiceContract>(&self) -> Option<Arc<InboundPort<C>>> {
        Arc::clone(&self.typed).downcast::<InboundPort<C>>().ok()
    }
}

impl std::fmt::Debug for PublishedPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedPort")
            .field("contract_id", &self.contract_id)
            .field("remote_visible", &self.remote_visible)
            .finish()
    }
}

type Factory = Arc<dyn Fn(&Cvm, Vec<Value>) -> Result<ComponentHandle> + Send + Sync>;

/// Maps type tags to component constructors
///
/// Constructor arguments arrive as a JSON array and are decoded into the
/// factory's argument type, so a tuple `(String, u32)` accepts
/// `["name", 3]`.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<String, Factory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `type_tag`, replacing any previous one
    pub fn register<A, F>(&self, type_tag: &str, factory: F)
    where
        A: DeserializeOwned + 'static,
        F: Fn(&Cvm, A) -> Result<ComponentHandle> + Send + Sync + 'static,
    {
        let tag = type_tag.to_string();
        let decoding_tag = tag.clone();

        let erased: Factory = Arc::new(move |cvm: &Cvm, args: Vec<Value>| {
            let args: A = serde_json::from_value(Value::Array(args)).map_err(|e| {
                CvmError::CreationService(format!(
                    "Bad constructor arguments for '{}': {}",
                    decoding_tag, e
                ))
            })?;
            factory(cvm, args)
        });

        debug!("Registered component factory '{}'", tag);
        self.factories.write().insert(tag, erased);
    }

    /// Whether a factory is registered under `type_tag`
    pub fn contains(&self, type_tag: &str) -> bool {
        self.factories.read().contains_key(type_tag)
    }

    /// Registered type tags, sorted
    pub fn type_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.factories.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Instantiate a component of `type_tag`
    pub fn instantiate(&self, cvm: &Cvm, type_tag: &str, args: Vec<Value>) -> Result<ComponentHandle> {
        let factory = self.factories.read().get(type_tag).cloned().ok_or_else(|| {
            CvmError::CreationService(format!("Unknown component type '{}'", type_tag))
        })?;

        factory(cvm, args)
    }
}
