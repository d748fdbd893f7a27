use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

/// Process-wide id allocator for devices, contexts, queues and events.
///
/// Ids are only ever compared for equality; the numeric value carries no
/// meaning beyond creation order.
pub(crate) fn next_object_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

bitflags! {
    /// Command-buffer related capabilities a device advertises.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceCaps: u32 {
        /// The device can run multiple in-flight submissions of one
        /// compiled command buffer.
        const SIMULTANEOUS_USE = 1 << 0;
        /// The device supports handles to recorded dispatches for later
        /// mutation.
        const MUTABLE_DISPATCH = 1 << 1;
    }
}

bitflags! {
    /// Command-queue properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueueProps: u32 {
        const OUT_OF_ORDER_EXEC = 1 << 0;
        const PROFILING = 1 << 1;
    }
}

/// Construction-time description of a host device.
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub name: String,
    pub caps: DeviceCaps,
    /// Queue properties queues on this device may be created with.
    pub supported_queue_props: QueueProps,
}

impl Default for DeviceDesc {
    fn default() -> Self {
        Self {
            name: "host".to_owned(),
            caps: DeviceCaps::SIMULTANEOUS_USE,
            supported_queue_props: QueueProps::all(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

#[derive(Debug)]
struct DeviceInner {
    id: DeviceId,
    desc: DeviceDesc,
}

/// A host execution device. Cheap to clone; clones alias the same device.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn new(desc: DeviceDesc) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                id: DeviceId(next_object_id()),
                desc,
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.desc.name
    }

    pub fn caps(&self) -> DeviceCaps {
        self.inner.desc.caps
    }

    pub fn supported_queue_props(&self) -> QueueProps {
        self.inner.desc.supported_queue_props
    }
}

#[derive(Debug)]
struct ContextInner {
    id: ContextId,
    devices: Vec<Device>,
}

/// A resource-sharing domain. Queues, memory objects, kernels and events
/// are tagged with the context they were created in; mixing objects across
/// contexts is rejected by their consumers.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(devices: &[Device]) -> Self {
        assert!(!devices.is_empty(), "a context needs at least one device");
        Self {
            inner: Arc::new(ContextInner {
                id: ContextId(next_object_id()),
                devices: devices.to_vec(),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    pub fn contains_device(&self, device: &Device) -> bool {
        self.inner.devices.iter().any(|d| d.id() == device.id())
    }
}
