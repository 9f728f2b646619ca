//! Device node resolution and container bind links

pub mod link;
pub mod path;

pub use link::{BindLinker, LinkStatus};
pub use path::{PathResolver, ResolvedPath, UsbAddress};

/// Default isolated USB tree exposed to containers
pub const DEFAULT_CONTAINER_DEVICE_ROOT: &str = "/var/lib/lxc-hotplug/usb";

/// One hotplug event, as passed on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub container_name: String,
    /// Node relative to the host device tree, e.g. `bus/usb/001/002`
    pub device_node: String,
    pub job_id: String,
}

impl DeviceEvent {
    pub fn new(
        container_name: impl Into<String>,
        device_node: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            container_name: container_name.into(),
            device_node: device_node.into(),
            job_id: job_id.into(),
        }
    }
}
