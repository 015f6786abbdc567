//! Node identifiers.
//!
//! The string form follows the OPC UA notation
//! `ns=<namespaceIndex>;<type>=<value>`, where `<type>` is one of `i`
//! (numeric), `s` (string), `g` (GUID) or `b` (opaque). A missing `ns=`
//! prefix selects namespace 0.

use std::str::FromStr;

use crate::error::{OpcUaError, Result};

/// Node identifier value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// `i=`
    Numeric(u32),
    /// `s=`
    String(String),
    /// `g=`, kept in its textual form
    Guid(String),
    /// `b=`, kept in its base64 form
    Opaque(String),
}

/// Node identifier: namespace index plus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    /// Namespace index
    pub namespace: u16,
    /// Identifier within the namespace
    pub identifier: Identifier,
}

impl NodeId {
    /// Create a string node id.
    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    /// Create a numeric node id.
    pub const fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    /// Parse a node id from its string form.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }
}

impl FromStr for NodeId {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || OpcUaError::InvalidNodeId(s.to_string());

        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail.split_once(';').ok_or_else(invalid)?;
                (ns.parse::<u16>().map_err(|_| invalid())?, rest)
            }
            None => (0, s),
        };

        let (kind, value) = rest.split_once('=').ok_or_else(invalid)?;
        if value.is_empty() {
            return Err(invalid());
        }

        let identifier = match kind {
            "i" => Identifier::Numeric(value.parse().map_err(|_| invalid())?),
            "s" => Identifier::String(value.to_string()),
            "g" => Identifier::Guid(value.to_string()),
            "b" => Identifier::Opaque(value.to_string()),
            _ => return Err(invalid()),
        };

        Ok(Self {
            namespace,
            identifier,
        })
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "i={}", v),
            Identifier::String(v) => write!(f, "s={}", v),
            Identifier::Guid(v) => write!(f, "g={}", v),
            Identifier::Opaque(v) => write!(f, "b={}", v),
        }
    }
}
