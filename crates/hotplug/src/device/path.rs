//! Mapping device nodes onto the host and container device trees
//!
//! USB nodes are renumbered inside the container's isolated tree: the host
//! node `bus/usb/<bus>/<device>` is bound at
//! `<container_root>/<bus>/<bus>:<device>`. Any other node is attached at its
//! host path and needs no bind link.

use crate::error::ResolveError;
use std::fmt;
use std::path::PathBuf;

/// Components that introduce the USB bus-enumeration subtree
const USB_SUBTREE: [&str; 2] = ["bus", "usb"];

/// Bus and device numbers of a USB node, kept as written (zero padded)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbAddress {
    pub bus: String,
    pub device: String,
}

impl fmt::Display for UsbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bus, self.device)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Absolute node path on the host
    pub host_path: PathBuf,
    pub usb: Option<UsbAddress>,
    /// Where the node must appear for the container; equals `host_path`
    /// for non-USB nodes
    pub bind_target: PathBuf,
}

impl ResolvedPath {
    pub fn requires_bind(&self) -> bool {
        self.usb.is_some()
    }
}

/// Resolves device nodes against a host root and a container root
#[derive(Debug, Clone)]
pub struct PathResolver {
    host_root: PathBuf,
    container_root: PathBuf,
}

impl PathResolver {
    pub fn new(host_root: impl Into<PathBuf>, container_root: impl Into<PathBuf>) -> Self {
        Self {
            host_root: host_root.into(),
            container_root: container_root.into(),
        }
    }

    /// Resolve `device_node` into host path and bind target
    ///
    /// Accepts `bus/usb/001/002`, `dev/bus/usb/001/002` and
    /// `/dev/bus/usb/001/002` interchangeably.
    pub fn resolve(&self, device_node: &str) -> Result<ResolvedPath, ResolveError> {
        let relative = normalize(device_node);
        let components = split_components(device_node, relative)?;

        let host_path = self.host_root.join(relative);

        if components.len() >= USB_SUBTREE.len() && components[..2] == USB_SUBTREE {
            let usb = match &components[2..] {
                [bus, device] => UsbAddress {
                    bus: (*bus).to_string(),
                    device: (*device).to_string(),
                },
                _ => {
                    return Err(malformed(device_node, "expected bus/usb/<bus>/<device>"));
                }
            };

            let bind_target = self.container_root.join(&usb.bus).join(usb.to_string());
            return Ok(ResolvedPath {
                host_path,
                usb: Some(usb),
                bind_target,
            });
        }

        Ok(ResolvedPath {
            bind_target: host_path.clone(),
            host_path,
            usb: None,
        })
    }
}

/// Strip a leading `/` and `dev/`
fn normalize(device_node: &str) -> &str {
    let node = device_node.trim_start_matches('/');
    node.strip_prefix("dev/").unwrap_or(node)
}

fn split_components<'a>(original: &str, relative: &'a str) -> Result<Vec<&'a str>, ResolveError> {
    if relative.is_empty() {
        return Err(malformed(original, "empty device node"));
    }

    let components: Vec<&str> = relative.split('/').collect();
    for component in &components {
        match *component {
            "" => return Err(malformed(original, "empty path component")),
            "." | ".." => return Err(malformed(original, "relative path component")),
            _ => {}
        }
    }
    Ok(components)
}

fn malformed(node: &str, reason: &'static str) -> ResolveError {
    ResolveError::MalformedDeviceNode {
        node: node.to_string(),
        reason,
    }
}
