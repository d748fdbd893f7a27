use kestrel_queue::QueueError;
use thiserror::Error;

use crate::sync_graph::SyncPointId;

/// Errors returned synchronously by command-buffer calls.
///
/// Every rejected call is side-effect free: the buffer's state, command list
/// and reference count are exactly what they were before the call.
/// Execution-time failures are not represented here — they surface through
/// the completion event a successful `enqueue` returns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CmdBufError {
    /// The handle refers to a buffer that has been destroyed.
    #[error("not a valid command buffer")]
    InvalidCommandBuffer,

    /// The buffer is in the wrong state for the requested operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// A malformed argument (empty queue list, duplicate property,
    /// out-of-range region, ...).
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    /// A well-formed creation property not supported by every associated
    /// device.
    #[error("property {0:?} is not supported by every associated device")]
    InvalidProperty(crate::buffer::CommandBufferProp),

    /// A per-command queue override was supplied; queue binding happens at
    /// buffer creation or at submission, never mid-record.
    #[error("commands cannot name a queue; binding happens at creation or submission")]
    InvalidCommandQueue,

    /// A substitute queue is bound to a different device than, or offers
    /// fewer properties than, the queue at the same slot.
    #[error("queue at slot {slot} cannot substitute for the originally bound queue")]
    IncompatibleCommandQueue { slot: usize },

    /// A queue, resource or event does not share the buffer's context.
    #[error("object does not share the command buffer's context")]
    InvalidContext,

    /// A wait list names a sync point this buffer never produced (or one
    /// produced by a later command).
    #[error("invalid sync point {0:?}")]
    InvalidSyncPoint(SyncPointId),

    /// A sync-point wait list was present but empty.
    #[error("sync-point wait list must be absent or non-empty")]
    InvalidSyncPointWaitList,

    /// An event wait list was present but empty.
    #[error("event wait list must be absent or non-empty")]
    InvalidEventWaitList,

    /// A failure reported by the underlying queue layer while establishing
    /// a submission.
    #[error(transparent)]
    Queue(#[from] QueueError),
}
