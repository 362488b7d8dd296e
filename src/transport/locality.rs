//! Local-vs-remote classification of disk endpoints

use crate::topology::split_endpoint;

/// Decides whether an endpoint is served by this process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locality {
    /// `host:port` of this node; `None` means single-node, everything local
    local: Option<String>,
}

impl Locality {
    pub fn new(local_endpoint: Option<&str>) -> Self {
        Self {
            local: local_endpoint
                .map(|e| split_endpoint(e).0.to_ascii_lowercase())
                .filter(|e| !e.is_empty()),
        }
    }

    /// Single-node mode
    pub fn all_local() -> Self {
        Self::default()
    }

    /// Whether `endpoint` refers to this node
    pub fn is_local(&self, endpoint: &str) -> bool {
        let Some(local) = &self.local else {
            return true;
        };
        let (host_port, _) = split_endpoint(endpoint);
        host_port.is_empty() || host_port.eq_ignore_ascii_case(local)
    }

    pub fn local_endpoint(&self) -> Option<&str> {
        self.local.as_deref()
    }
}
