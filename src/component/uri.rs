// src/component/uri.rs
//! URIs for components and ports
//!
//! Every URI has the form `cvm://<node-id>/<local-name>`. The node id is the
//! deployment target that owns the entity, which lets a connector decide
//! whether a peer is local or must be reached over the transport.

use crate::utils::errors::{CvmError, Result};
use ulid::Ulid;

/// URI scheme prefix
pub const SCHEME: &str = "cvm://";

/// Generate a fresh URI on `node_id` for an entity described by `hint`
pub fn generate(node_id: &str, hint: &str) -> String {
    format!(
        "{}{}/{}-{}",
        SCHEME,
        node_id,
        hint,
        Ulid::new().to_string().to_lowercase()
    )
}

/// URI for a well-known entity on `node_id`
pub fn well_known(node_id: &str, name: &str) -> String {
    format!("{}{}/{}", SCHEME, node_id, name)
}

/// Node id encoded in `uri`
pub fn node_of(uri: &str) -> Result<&str> {
    let rest = uri
        .strip_prefix(SCHEME)
        .ok_or_else(|| CvmError::Connection(format!("Malformed URI '{}'", uri)))?;

    match rest.split_once('/') {
        Some((node, local)) if !node.is_empty() && !local.is_empty() => Ok(node),
        _ => Err(CvmError::Connection(format!("Malformed URI '{}'", uri))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_uris_are_unique() {
        let a = generate("node-a", "port");
        let b = generate("node-a", "port");
        assert_ne!(a, b);
        assert!(a.starts_with("cvm://node-a/port-"));
    }

    #[test]
    fn test_node_of() {
        assert_eq!(node_of("cvm://node-a/manager").unwrap(), "node-a");
        assert!(node_of("http://node-a/manager").is_err());
        assert!(node_of("cvm://node-a").is_err());
        assert!(node_of("cvm:///x").is_err());
    }
}
