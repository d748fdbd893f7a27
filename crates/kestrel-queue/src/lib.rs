//! `kestrel-queue` is the host-side capability layer the command-buffer
//! engine (`kestrel-cmdbuf`) builds on: devices, contexts, in-order command
//! queues, events, memory objects and host kernels.
//!
//! It is a complete software backend — everything executes in-process on
//! worker threads — so the engine and its tests run end-to-end without
//! real accelerator hardware:
//!
//! - [`Device`] / [`Context`]: capability flags and resource-sharing domains.
//! - [`CommandQueue`]: FIFO worker-thread queues with event wait lists
//!   (see [`QueueOp`] for the native op set).
//! - [`Event`]: completion handles and host-signaled user events.
//! - [`MemBuffer`] / [`MemImage`]: context-tagged shared memory objects.
//! - [`Kernel`]: compiled-elsewhere kernels as named host closures with
//!   mutable argument bindings.

mod context;
mod error;
mod event;
mod kernel;
mod memory;
mod queue;

pub use context::{Context, ContextId, Device, DeviceCaps, DeviceDesc, DeviceId, QueueProps};
pub use error::QueueError;
pub use event::Event;
pub use kernel::{DispatchArgs, Kernel, KernelArg, KernelFn};
pub use memory::{BufferRectCopy, MemBuffer, MemImage};
pub use queue::{CommandQueue, QueueId, QueueOp};
