//! `kestrel-cmdbuf` is a command-buffer execution engine for the host
//! backend in [`kestrel-queue`]: record a sequence of accelerator
//! operations once, compile it with [`CommandBuffer::finalize`], then
//! replay it any number of times — concurrently, with the simultaneous-use
//! property — against the originally bound queues or compatible
//! substitutes.
//!
//! Recording hands out [`SyncPointId`]s: each recorded command may wait on
//! sync points produced by earlier commands of the same buffer, forming a
//! dependency DAG that finalize compiles into a cached, deterministic
//! schedule. Submissions walk that schedule and translate each command into
//! the queue layer's native ops, gated by per-command completion events;
//! the returned [`Event`](kestrel_queue::Event) completes when the whole
//! submission has drained.
//!
//! [`kestrel-queue`]: kestrel_queue

mod buffer;
mod command;
mod error;
mod info;
mod submit;
mod sync_graph;

pub use buffer::{
    BufferRectCopy, BufferState, CommandBuffer, CommandBufferProp, CommandBufferProps,
    DispatchDesc,
};
pub use command::MutableCommandId;
pub use error::CmdBufError;
pub use info::CommandBufferInfo;
pub use sync_graph::SyncPointId;
