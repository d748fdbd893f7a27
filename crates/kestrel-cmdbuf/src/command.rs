//! Recorded command descriptors.
//!
//! The recordable operation set is closed; the submission engine matches on
//! it to translate each record into the queue layer's native op. Every
//! record freezes its inputs (resources, parameters, kernel argument
//! bindings) at append time.

use std::sync::Arc;

use kestrel_queue::{BufferRectCopy, KernelArg, KernelFn, MemBuffer, MemImage};

use crate::sync_graph::SyncPointId;

/// Handle to a recorded dispatch that may later be mutated, available only
/// on buffers created with the mutable-dispatch property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutableCommandId(pub u32);

#[derive(Clone)]
pub(crate) enum Command {
    KernelDispatch {
        kernel_name: String,
        body: Arc<KernelFn>,
        /// Bindings frozen at record time; later `set_arg` calls on the
        /// kernel do not reach this occurrence.
        args: Vec<KernelArg>,
        global_size: usize,
    },
    FillBuffer {
        dst: MemBuffer,
        pattern: Vec<u8>,
        offset: usize,
        len: usize,
    },
    CopyBuffer {
        src: MemBuffer,
        dst: MemBuffer,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
    },
    CopyBufferRect {
        src: MemBuffer,
        dst: MemBuffer,
        rect: BufferRectCopy,
    },
    FillImage {
        dst: MemImage,
        pattern: Vec<u8>,
        origin: [usize; 2],
        region: [usize; 2],
    },
    CopyImage {
        src: MemImage,
        dst: MemImage,
        src_origin: [usize; 2],
        dst_origin: [usize; 2],
        region: [usize; 2],
    },
    CopyImageToBuffer {
        src: MemImage,
        dst: MemBuffer,
        origin: [usize; 2],
        region: [usize; 2],
        dst_offset: usize,
    },
    CopyBufferToImage {
        src: MemBuffer,
        dst: MemImage,
        src_offset: usize,
        origin: [usize; 2],
        region: [usize; 2],
    },
    /// Pure ordering node; executes nothing.
    Barrier,
}

impl Command {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Command::KernelDispatch { .. } => "kernel_dispatch",
            Command::FillBuffer { .. } => "fill_buffer",
            Command::CopyBuffer { .. } => "copy_buffer",
            Command::CopyBufferRect { .. } => "copy_buffer_rect",
            Command::FillImage { .. } => "fill_image",
            Command::CopyImage { .. } => "copy_image",
            Command::CopyImageToBuffer { .. } => "copy_image_to_buffer",
            Command::CopyBufferToImage { .. } => "copy_buffer_to_image",
            Command::Barrier => "barrier",
        }
    }
}

/// One entry in a buffer's recorded sequence: the operation plus its
/// position in the dependency graph. Immutable once appended.
pub(crate) struct CommandRecord {
    pub(crate) command: Command,
    /// Sync points this command waits on (resolved against the graph at
    /// finalize time).
    pub(crate) waits: Vec<SyncPointId>,
    /// The sync point this command produces.
    pub(crate) signal: SyncPointId,
}
