use thiserror::Error;

/// Errors produced by the host queue backend.
///
/// Failures raised while an operation executes on a queue worker are not
/// returned from the enqueue call; they become the terminal status of the
/// operation's [`Event`](crate::Event) and surface from `Event::wait()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("buffer access out of bounds (offset {offset} + len {len} > size {size})")]
    BufferOutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error(
        "image access out of bounds (origin {origin:?} + region {region:?} exceeds {width}x{height})"
    )]
    ImageOutOfBounds {
        origin: [usize; 2],
        region: [usize; 2],
        width: usize,
        height: usize,
    },

    #[error("fill pattern is empty")]
    EmptyPattern,

    #[error("fill range of {len} bytes is not a multiple of the {pattern_len}-byte pattern")]
    PatternSizeMismatch { len: usize, pattern_len: usize },

    #[error("fill pattern of {pattern_len} bytes does not match image element size {elem_size}")]
    PatternElementMismatch { pattern_len: usize, elem_size: usize },

    #[error("image element sizes differ (src {src}, dst {dst})")]
    ElementSizeMismatch { src: usize, dst: usize },

    #[error("resource belongs to a different context")]
    WrongContext,

    #[error("device does not support the requested queue properties")]
    UnsupportedQueueProps,

    #[error("failed to spawn queue worker thread: {0}")]
    WorkerSpawnFailed(String),

    #[error("kernel argument index {index} is out of range (kernel has {len} arguments)")]
    InvalidKernelArg { index: usize, len: usize },

    #[error("kernel `{kernel}` failed: {reason}")]
    KernelFailed { kernel: String, reason: String },

    #[error("event is not a user event")]
    NotUserEvent,

    #[error("user event was already signaled")]
    UserEventAlreadySignaled,

    #[error("a dependency of this operation failed: {0}")]
    DependencyFailed(String),
}
