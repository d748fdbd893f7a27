//! The command buffer: recorded command sequence, lifecycle state machine,
//! record-time validation and reference counting.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use tracing::debug;

use kestrel_queue::{CommandQueue, Context, ContextId, DeviceCaps, Kernel, MemBuffer, MemImage};

use crate::command::{Command, CommandRecord, MutableCommandId};
use crate::error::CmdBufError;
use crate::sync_graph::{Schedule, SyncGraph, SyncPointId};

pub use kestrel_queue::BufferRectCopy;

bitflags! {
    /// Creation-time capability flags, queryable as the properties array.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandBufferProps: u64 {
        const SIMULTANEOUS_USE = 1 << 0;
        const MUTABLE_DISPATCH = 1 << 1;
    }
}

/// One creation property. Listing the same property twice is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferProp {
    /// Allow overlapping in-flight submissions of the finalized buffer.
    SimultaneousUse,
    /// Allow requesting mutable handles to recorded dispatches.
    MutableDispatch,
}

impl CommandBufferProp {
    fn flag(self) -> CommandBufferProps {
        match self {
            CommandBufferProp::SimultaneousUse => CommandBufferProps::SIMULTANEOUS_USE,
            CommandBufferProp::MutableDispatch => CommandBufferProps::MUTABLE_DISPATCH,
        }
    }

    fn required_cap(self) -> DeviceCaps {
        match self {
            CommandBufferProp::SimultaneousUse => DeviceCaps::SIMULTANEOUS_USE,
            CommandBufferProp::MutableDispatch => DeviceCaps::MUTABLE_DISPATCH,
        }
    }
}

/// Lifecycle state. The only reachable cycle is
/// Recording → Executable → Pending → Executable → Pending → ...
/// (simultaneous-use buffers never leave Executable after finalize).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Recording,
    Executable,
    Pending,
}

impl BufferState {
    /// The closed transition table; everything else is rejected.
    pub(crate) fn can_transition_to(self, next: BufferState) -> bool {
        matches!(
            (self, next),
            (BufferState::Recording, BufferState::Executable)
                | (BufferState::Executable, BufferState::Pending)
                | (BufferState::Pending, BufferState::Executable)
        )
    }
}

/// Parameters of a recorded kernel dispatch.
#[derive(Clone, Copy)]
pub struct DispatchDesc<'a> {
    pub kernel: &'a Kernel,
    pub global_size: usize,
}

/// The command list and schedule frozen by `finalize`. Shared read-only by
/// every submission.
pub(crate) struct Compiled {
    pub(crate) commands: Vec<CommandRecord>,
    pub(crate) schedule: Schedule,
}

pub(crate) struct RecordingState {
    pub(crate) state: BufferState,
    /// Commands appended so far; moved into `compiled` at finalize.
    building: Vec<CommandRecord>,
    graph: SyncGraph,
    pub(crate) compiled: Option<Arc<Compiled>>,
}

pub(crate) struct CmdBufInner {
    pub(crate) id: u64,
    pub(crate) context: Context,
    pub(crate) queues: Vec<CommandQueue>,
    pub(crate) props: CommandBufferProps,
    /// Logical reference count governed by retain/release, not by handle
    /// clones.
    pub(crate) refcount: AtomicU32,
    /// Submissions issued but not yet completed.
    pub(crate) in_flight: AtomicU32,
    destroyed: AtomicBool,
    pub(crate) rec: Mutex<RecordingState>,
}

impl CmdBufInner {
    pub(crate) fn ensure_alive(&self) -> Result<(), CmdBufError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(CmdBufError::InvalidCommandBuffer);
        }
        Ok(())
    }

    /// Destroy once the logical refcount is zero and nothing is in flight.
    /// Called from `release` and from submission completion callbacks, so a
    /// release that races a draining submission is settled by whichever
    /// observes both counters at zero.
    pub(crate) fn try_destroy(&self) {
        if self.refcount.load(Ordering::Acquire) == 0
            && self.in_flight.load(Ordering::Acquire) == 0
            && !self.destroyed.swap(true, Ordering::AcqRel)
        {
            debug!(buffer = self.id, "command buffer destroyed");
        }
    }
}

/// A recorded, finalizable, replayable sequence of queue operations.
///
/// Handles are cheap clones of one shared buffer; the logical lifetime is
/// governed by [`retain`](Self::retain) / [`release`](Self::release), and
/// every call on a destroyed buffer fails with
/// [`CmdBufError::InvalidCommandBuffer`].
#[derive(Clone)]
pub struct CommandBuffer {
    pub(crate) inner: Arc<CmdBufInner>,
}

fn next_buffer_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

impl CommandBuffer {
    /// Create a buffer bound to `queues` (1..N slots, captured here and
    /// immutable afterwards) in the Recording state with refcount 1.
    pub fn create(
        queues: &[CommandQueue],
        props: &[CommandBufferProp],
    ) -> Result<CommandBuffer, CmdBufError> {
        if queues.is_empty() {
            return Err(CmdBufError::InvalidValue(
                "a command buffer needs at least one queue",
            ));
        }
        let context = queues[0].context().clone();
        if queues.iter().any(|q| q.context_id() != context.id()) {
            return Err(CmdBufError::InvalidContext);
        }

        let mut flags = CommandBufferProps::empty();
        for &prop in props {
            if flags.contains(prop.flag()) {
                return Err(CmdBufError::InvalidValue(
                    "a property may be specified at most once",
                ));
            }
            if queues
                .iter()
                .any(|q| !q.device().caps().contains(prop.required_cap()))
            {
                return Err(CmdBufError::InvalidProperty(prop));
            }
            flags |= prop.flag();
        }

        let buffer = CommandBuffer {
            inner: Arc::new(CmdBufInner {
                id: next_buffer_id(),
                context,
                queues: queues.to_vec(),
                props: flags,
                refcount: AtomicU32::new(1),
                in_flight: AtomicU32::new(0),
                destroyed: AtomicBool::new(false),
                rec: Mutex::new(RecordingState {
                    state: BufferState::Recording,
                    building: Vec::new(),
                    graph: SyncGraph::new(),
                    compiled: None,
                }),
            }),
        };
        debug!(buffer = buffer.inner.id, queues = queues.len(), props = ?flags, "command buffer created");
        Ok(buffer)
    }

    /// Increment the logical reference count.
    pub fn retain(&self) -> Result<(), CmdBufError> {
        self.inner.ensure_alive()?;
        self.inner.refcount.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Decrement the logical reference count. On reaching zero the buffer is
    /// destroyed — deferred until in-flight submissions complete.
    pub fn release(&self) -> Result<(), CmdBufError> {
        self.inner.ensure_alive()?;
        let mut current = self.inner.refcount.load(Ordering::Acquire);
        loop {
            if current == 0 {
                // Already released to zero; the handle only remains callable
                // because destruction is deferred behind a submission.
                return Err(CmdBufError::InvalidCommandBuffer);
            }
            match self.inner.refcount.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == 1 {
            self.inner.try_destroy();
        }
        Ok(())
    }

    /// Compile the recorded sequence: validate, compute and cache the
    /// schedule, and transition Recording → Executable (one-way). An empty
    /// buffer finalizes trivially and replays as a no-op.
    pub fn finalize(&self) -> Result<(), CmdBufError> {
        self.inner.ensure_alive()?;
        let mut rec = self.inner.rec.lock().unwrap();
        if rec.state != BufferState::Recording {
            return Err(CmdBufError::InvalidOperation(
                "finalize requires the recording state",
            ));
        }

        let schedule = Schedule::build(rec.building.len() as u32, &rec.graph, |cmd| {
            rec.building[cmd as usize].waits.clone()
        })?;
        let commands = std::mem::take(&mut rec.building);
        let command_count = commands.len();
        debug_assert!(rec.state.can_transition_to(BufferState::Executable));
        rec.compiled = Some(Arc::new(Compiled { commands, schedule }));
        rec.state = BufferState::Executable;
        debug!(buffer = self.inner.id, commands = command_count, "command buffer finalized");
        Ok(())
    }

    /// Record a kernel dispatch. The kernel's current argument bindings are
    /// frozen into this occurrence; later `set_arg` calls affect only
    /// commands recorded afterwards.
    pub fn record_dispatch(
        &self,
        queue: Option<&CommandQueue>,
        desc: &DispatchDesc<'_>,
        waits: Option<&[SyncPointId]>,
    ) -> Result<SyncPointId, CmdBufError> {
        self.record_dispatch_inner(queue, desc, waits, false)
            .map(|(sp, _)| sp)
    }

    /// Record a kernel dispatch and return a handle for later mutation.
    /// Requires the buffer to have been created with
    /// [`CommandBufferProp::MutableDispatch`].
    pub fn record_mutable_dispatch(
        &self,
        queue: Option<&CommandQueue>,
        desc: &DispatchDesc<'_>,
        waits: Option<&[SyncPointId]>,
    ) -> Result<(SyncPointId, MutableCommandId), CmdBufError> {
        self.record_dispatch_inner(queue, desc, waits, true)
            .map(|(sp, index)| (sp, MutableCommandId(index)))
    }

    fn record_dispatch_inner(
        &self,
        queue: Option<&CommandQueue>,
        desc: &DispatchDesc<'_>,
        waits: Option<&[SyncPointId]>,
        want_mutable_handle: bool,
    ) -> Result<(SyncPointId, u32), CmdBufError> {
        let kernel = desc.kernel;
        // Snapshot here: this is the record-time freeze of argument values.
        let args = kernel.args_snapshot();
        let mut contexts = vec![kernel.context_id()];
        contexts.extend(args.iter().filter_map(|arg| arg.context_id()));
        let global_size = desc.global_size;
        let props = self.inner.props;

        self.append(queue, &contexts, waits, move || {
            if want_mutable_handle && !props.contains(CommandBufferProps::MUTABLE_DISPATCH) {
                return Err(CmdBufError::InvalidValue(
                    "mutable handles require the mutable-dispatch property",
                ));
            }
            if global_size == 0 {
                return Err(CmdBufError::InvalidValue("global size must be non-zero"));
            }
            Ok(Command::KernelDispatch {
                kernel_name: kernel.name().to_owned(),
                body: kernel.body_handle(),
                args,
                global_size,
            })
        })
    }

    /// Record a pattern fill of `dst[offset..offset + len]`.
    pub fn record_fill_buffer(
        &self,
        queue: Option<&CommandQueue>,
        dst: &MemBuffer,
        pattern: &[u8],
        offset: usize,
        len: usize,
        waits: Option<&[SyncPointId]>,
    ) -> Result<SyncPointId, CmdBufError> {
        self.append(queue, &[dst.context_id()], waits, || {
            if pattern.is_empty() {
                return Err(CmdBufError::InvalidValue("fill pattern is empty"));
            }
            if len == 0 || len % pattern.len() != 0 {
                return Err(CmdBufError::InvalidValue(
                    "fill length must be a non-zero multiple of the pattern length",
                ));
            }
            dst.check_access(offset, len)
                .map_err(|_| CmdBufError::InvalidValue("fill range out of bounds"))?;
            Ok(Command::FillBuffer {
                dst: dst.clone(),
                pattern: pattern.to_vec(),
                offset,
                len,
            })
        })
        .map(|(sp, _)| sp)
    }

    /// Record a byte copy between (possibly aliasing) buffers.
    pub fn record_copy_buffer(
        &self,
        queue: Option<&CommandQueue>,
        src: &MemBuffer,
        dst: &MemBuffer,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        waits: Option<&[SyncPointId]>,
    ) -> Result<SyncPointId, CmdBufError> {
        self.append(queue, &[src.context_id(), dst.context_id()], waits, || {
            src.check_access(src_offset, len)
                .map_err(|_| CmdBufError::InvalidValue("copy source range out of bounds"))?;
            dst.check_access(dst_offset, len)
                .map_err(|_| CmdBufError::InvalidValue("copy destination range out of bounds"))?;
            Ok(Command::CopyBuffer {
                src: src.clone(),
                dst: dst.clone(),
                src_offset,
                dst_offset,
                len,
            })
        })
        .map(|(sp, _)| sp)
    }

    /// Record a pitched 2-D copy between buffers.
    pub fn record_copy_buffer_rect(
        &self,
        queue: Option<&CommandQueue>,
        src: &MemBuffer,
        dst: &MemBuffer,
        rect: &BufferRectCopy,
        waits: Option<&[SyncPointId]>,
    ) -> Result<SyncPointId, CmdBufError> {
        let rect = *rect;
        self.append(queue, &[src.context_id(), dst.context_id()], waits, || {
            let [width, rows] = rect.region;
            if width == 0 || rows == 0 {
                return Err(CmdBufError::InvalidValue("rect region must be non-empty"));
            }
            let last_row_start = |origin: [usize; 2], pitch: usize| {
                origin[1]
                    .checked_add(rows - 1)
                    .and_then(|row| row.checked_mul(pitch))
                    .and_then(|base| base.checked_add(origin[0]))
            };
            let src_end = last_row_start(rect.src_origin, rect.src_row_pitch)
                .ok_or(CmdBufError::InvalidValue("rect source region out of bounds"))?;
            let dst_end = last_row_start(rect.dst_origin, rect.dst_row_pitch).ok_or(
                CmdBufError::InvalidValue("rect destination region out of bounds"),
            )?;
            src.check_access(src_end, width)
                .map_err(|_| CmdBufError::InvalidValue("rect source region out of bounds"))?;
            dst.check_access(dst_end, width)
                .map_err(|_| CmdBufError::InvalidValue("rect destination region out of bounds"))?;
            Ok(Command::CopyBufferRect {
                src: src.clone(),
                dst: dst.clone(),
                rect,
            })
        })
        .map(|(sp, _)| sp)
    }

    /// Record an element fill of an image region.
    pub fn record_fill_image(
        &self,
        queue: Option<&CommandQueue>,
        dst: &MemImage,
        pattern: &[u8],
        origin: [usize; 2],
        region: [usize; 2],
        waits: Option<&[SyncPointId]>,
    ) -> Result<SyncPointId, CmdBufError> {
        self.append(queue, &[dst.context_id()], waits, || {
            if pattern.len() != dst.elem_size() {
                return Err(CmdBufError::InvalidValue(
                    "fill pattern must be exactly one image element",
                ));
            }
            dst.check_region(origin, region)
                .map_err(|_| CmdBufError::InvalidValue("image fill region out of bounds"))?;
            Ok(Command::FillImage {
                dst: dst.clone(),
                pattern: pattern.to_vec(),
                origin,
                region,
            })
        })
        .map(|(sp, _)| sp)
    }

    /// Record an image-to-image region copy.
    pub fn record_copy_image(
        &self,
        queue: Option<&CommandQueue>,
        src: &MemImage,
        dst: &MemImage,
        src_origin: [usize; 2],
        dst_origin: [usize; 2],
        region: [usize; 2],
        waits: Option<&[SyncPointId]>,
    ) -> Result<SyncPointId, CmdBufError> {
        self.append(queue, &[src.context_id(), dst.context_id()], waits, || {
            if src.elem_size() != dst.elem_size() {
                return Err(CmdBufError::InvalidValue("image element sizes differ"));
            }
            src.check_region(src_origin, region)
                .map_err(|_| CmdBufError::InvalidValue("image copy source region out of bounds"))?;
            dst.check_region(dst_origin, region).map_err(|_| {
                CmdBufError::InvalidValue("image copy destination region out of bounds")
            })?;
            Ok(Command::CopyImage {
                src: src.clone(),
                dst: dst.clone(),
                src_origin,
                dst_origin,
                region,
            })
        })
        .map(|(sp, _)| sp)
    }

    /// Record an image-region to tightly-packed-bytes transfer.
    pub fn record_copy_image_to_buffer(
        &self,
        queue: Option<&CommandQueue>,
        src: &MemImage,
        dst: &MemBuffer,
        origin: [usize; 2],
        region: [usize; 2],
        dst_offset: usize,
        waits: Option<&[SyncPointId]>,
    ) -> Result<SyncPointId, CmdBufError> {
        self.append(queue, &[src.context_id(), dst.context_id()], waits, || {
            src.check_region(origin, region)
                .map_err(|_| CmdBufError::InvalidValue("image region out of bounds"))?;
            dst.check_access(dst_offset, region[0] * region[1] * src.elem_size())
                .map_err(|_| CmdBufError::InvalidValue("buffer range out of bounds"))?;
            Ok(Command::CopyImageToBuffer {
                src: src.clone(),
                dst: dst.clone(),
                origin,
                region,
                dst_offset,
            })
        })
        .map(|(sp, _)| sp)
    }

    /// Record a tightly-packed-bytes to image-region transfer.
    pub fn record_copy_buffer_to_image(
        &self,
        queue: Option<&CommandQueue>,
        src: &MemBuffer,
        dst: &MemImage,
        src_offset: usize,
        origin: [usize; 2],
        region: [usize; 2],
        waits: Option<&[SyncPointId]>,
    ) -> Result<SyncPointId, CmdBufError> {
        self.append(queue, &[src.context_id(), dst.context_id()], waits, || {
            dst.check_region(origin, region)
                .map_err(|_| CmdBufError::InvalidValue("image region out of bounds"))?;
            src.check_access(src_offset, region[0] * region[1] * dst.elem_size())
                .map_err(|_| CmdBufError::InvalidValue("buffer range out of bounds"))?;
            Ok(Command::CopyBufferToImage {
                src: src.clone(),
                dst: dst.clone(),
                src_offset,
                origin,
                region,
            })
        })
        .map(|(sp, _)| sp)
    }

    /// Record a barrier. With `waits: None` the barrier depends on every
    /// sync point produced so far; with an explicit list it depends exactly
    /// on that list. Downstream commands can wait on the returned sync point.
    pub fn record_barrier(
        &self,
        queue: Option<&CommandQueue>,
        waits: Option<&[SyncPointId]>,
    ) -> Result<SyncPointId, CmdBufError> {
        self.inner.ensure_alive()?;
        let mut rec = self.inner.rec.lock().unwrap();
        Self::check_recording(&rec)?;
        if queue.is_some() {
            return Err(CmdBufError::InvalidCommandQueue);
        }

        let index = rec.building.len() as u32;
        let waits = match waits {
            None => rec.graph.all_ids().collect(),
            Some([]) => return Err(CmdBufError::InvalidSyncPointWaitList),
            Some(list) => {
                rec.graph.validate_waits(index, list)?;
                list.to_vec()
            }
        };

        let signal = rec.graph.allocate(index);
        rec.building.push(CommandRecord {
            command: Command::Barrier,
            waits,
            signal,
        });
        Ok(signal)
    }

    fn check_recording(rec: &RecordingState) -> Result<(), CmdBufError> {
        if rec.state != BufferState::Recording {
            return Err(CmdBufError::InvalidOperation(
                "commands can only be recorded while the buffer is recording",
            ));
        }
        Ok(())
    }

    /// Shared record path, validating in the fixed order: buffer state,
    /// queue override, resource contexts, wait list, then the op's own value
    /// checks inside `build`. On success the command is appended and its
    /// produced sync point allocated. Returns the sync point and the
    /// command's index.
    fn append(
        &self,
        queue: Option<&CommandQueue>,
        resource_contexts: &[ContextId],
        waits: Option<&[SyncPointId]>,
        build: impl FnOnce() -> Result<Command, CmdBufError>,
    ) -> Result<(SyncPointId, u32), CmdBufError> {
        self.inner.ensure_alive()?;
        let mut rec = self.inner.rec.lock().unwrap();
        Self::check_recording(&rec)?;
        if queue.is_some() {
            return Err(CmdBufError::InvalidCommandQueue);
        }
        if resource_contexts
            .iter()
            .any(|&ctx| ctx != self.inner.context.id())
        {
            return Err(CmdBufError::InvalidContext);
        }

        let index = rec.building.len() as u32;
        let waits = match waits {
            None => Vec::new(),
            Some([]) => return Err(CmdBufError::InvalidSyncPointWaitList),
            Some(list) => {
                rec.graph.validate_waits(index, list)?;
                list.to_vec()
            }
        };

        let command = build()?;
        let signal = rec.graph.allocate(index);
        rec.building.push(CommandRecord {
            command,
            waits,
            signal,
        });
        Ok((signal, index))
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("id", &self.inner.id)
            .field("context", &self.inner.context.id())
            .field("queues", &self.inner.queues.len())
            .field("props", &self.inner.props)
            .finish()
    }
}
