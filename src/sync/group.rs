// src/sync/group.rs
//! Synchronization group identifiers
//!
//! A group identifier names a tool instance and carries the parameter the
//! tool needs when it is first created: permits for a semaphore, parties
//! for a barrier, the initial count of a latch, the capacity of a queue.
//! The textual form is `<name>:<parameter>`; the name may itself contain
//! colons.

use crate::utils::errors::{CvmError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId {
    name: String,
    parameter: u32,
}

impl GroupId {
    /// Build a group; the name must not be empty
    pub fn new(name: impl Into<String>, parameter: u32) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CvmError::ToolProtocol("Group name cannot be empty".to_string()));
        }
        Ok(Self { name, parameter })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Permits, parties, count or capacity, depending on the tool
    pub fn parameter(&self) -> u32 {
        self.parameter
    }

    /// Text form used as a creation argument
    pub fn encode(&self) -> String {
        format!("{}:{}", self.name, self.parameter)
    }

    /// Parse the output of [`GroupId::encode`]
    pub fn decode(encoded: &str) -> Result<Self> {
        let (name, parameter) = encoded.rsplit_once(':').ok_or_else(|| {
            CvmError::ToolProtocol(format!("Malformed group identifier '{}'", encoded))
        })?;

        let parameter = parameter.parse::<u32>().map_err(|_| {
            CvmError::ToolProtocol(format!("Malformed group parameter in '{}'", encoded))
        })?;

        Self::new(name, parameter)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.parameter)
    }
}

impl FromStr for GroupId {
    type Err = CvmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}
