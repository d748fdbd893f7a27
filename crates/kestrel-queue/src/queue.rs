use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::trace;

use crate::context::{next_object_id, Context, ContextId, Device, QueueProps};
use crate::error::QueueError;
use crate::event::Event;
use crate::kernel::{DispatchArgs, Kernel, KernelArg, KernelFn};
use crate::memory::{BufferRectCopy, MemBuffer, MemImage};

/// One executable operation, with every input frozen at enqueue time.
///
/// This is the native op set the command-buffer engine translates recorded
/// commands into; it is public for that reason but not intended as a
/// general-purpose surface — callers normally go through the `enqueue_*`
/// helpers on [`CommandQueue`].
pub enum QueueOp {
    Dispatch {
        kernel_name: String,
        body: Arc<KernelFn>,
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
    WriteBuffer {
        dst: MemBuffer,
        offset: usize,
        bytes: Vec<u8>,
    },
    /// Completes once its wait list has drained; executes nothing.
    Marker,
}

impl QueueOp {
    fn kind(&self) -> &'static str {
        match self {
            QueueOp::Dispatch { .. } => "dispatch",
            QueueOp::FillBuffer { .. } => "fill_buffer",
            QueueOp::CopyBuffer { .. } => "copy_buffer",
            QueueOp::CopyBufferRect { .. } => "copy_buffer_rect",
            QueueOp::FillImage { .. } => "fill_image",
            QueueOp::CopyImage { .. } => "copy_image",
            QueueOp::CopyImageToBuffer { .. } => "copy_image_to_buffer",
            QueueOp::CopyBufferToImage { .. } => "copy_buffer_to_image",
            QueueOp::WriteBuffer { .. } => "write_buffer",
            QueueOp::Marker => "marker",
        }
    }

    fn execute(&self) -> Result<(), QueueError> {
        match self {
            QueueOp::Dispatch {
                kernel_name,
                body,
                args,
                global_size,
            } => {
                let dispatch = DispatchArgs {
                    global_size: *global_size,
                    args,
                };
                body(&dispatch).map_err(|err| match err {
                    failure @ QueueError::KernelFailed { .. } => failure,
                    other => QueueError::KernelFailed {
                        kernel: kernel_name.clone(),
                        reason: other.to_string(),
                    },
                })
            }
            QueueOp::FillBuffer {
                dst,
                pattern,
                offset,
                len,
            } => dst.fill(pattern, *offset, *len),
            QueueOp::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                len,
            } => src.copy_to(dst, *src_offset, *dst_offset, *len),
            QueueOp::CopyBufferRect { src, dst, rect } => src.copy_rect_to(dst, rect),
            QueueOp::FillImage {
                dst,
                pattern,
                origin,
                region,
            } => dst.fill(pattern, *origin, *region),
            QueueOp::CopyImage {
                src,
                dst,
                src_origin,
                dst_origin,
                region,
            } => src.copy_to(dst, *src_origin, *dst_origin, *region),
            QueueOp::CopyImageToBuffer {
                src,
                dst,
                origin,
                region,
                dst_offset,
            } => src.copy_to_buffer(dst, *origin, *region, *dst_offset),
            QueueOp::CopyBufferToImage {
                src,
                dst,
                src_offset,
                origin,
                region,
            } => dst.copy_from_buffer(src, *src_offset, *origin, *region),
            QueueOp::WriteBuffer { dst, offset, bytes } => dst.write(*offset, bytes),
            QueueOp::Marker => Ok(()),
        }
    }
}

struct Task {
    op: QueueOp,
    waits: Vec<Event>,
    signal: Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub u64);

struct QueueInner {
    id: QueueId,
    context: Context,
    device: Device,
    props: QueueProps,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Close the channel so the worker drains and exits, then join it —
        // unless this drop is running *on* the worker (a completion callback
        // releasing the last handle), where the worker just detaches.
        self.sender.lock().unwrap().take();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// An in-order host command queue.
///
/// Ops execute FIFO on a dedicated worker thread. Each op first waits for
/// its event wait list; a failed dependency fails the op without running it.
/// Enqueueing never blocks — results travel through the returned [`Event`].
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    /// Create a queue on `device` with the requested properties.
    ///
    /// `device` must belong to `context` and support `props`.
    pub fn new(context: &Context, device: &Device, props: QueueProps) -> Result<Self, QueueError> {
        if !context.contains_device(device) {
            return Err(QueueError::WrongContext);
        }
        if !device.supported_queue_props().contains(props) {
            return Err(QueueError::UnsupportedQueueProps);
        }

        let id = QueueId(next_object_id());
        let (sender, receiver) = mpsc::channel::<Task>();
        let worker = std::thread::Builder::new()
            .name(format!("kestrel-queue-{}", id.0))
            .spawn(move || worker_loop(id, receiver))
            .map_err(|err| QueueError::WorkerSpawnFailed(err.to_string()))?;

        Ok(Self {
            inner: Arc::new(QueueInner {
                id,
                context: context.clone(),
                device: device.clone(),
                props,
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub fn id(&self) -> QueueId {
        self.inner.id
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn context_id(&self) -> ContextId {
        self.inner.context.id()
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn props(&self) -> QueueProps {
        self.inner.props
    }

    /// Whether `self` can stand in for `original` at submission time: same
    /// device, and at least the original's properties.
    pub fn can_substitute_for(&self, original: &CommandQueue) -> bool {
        self.inner.device.id() == original.inner.device.id()
            && self.inner.props.contains(original.inner.props)
    }

    /// Enqueue `op` behind `waits`. Returns the op's completion event.
    pub fn enqueue_op(&self, op: QueueOp, waits: &[Event]) -> Event {
        let signal = Event::new(self.context_id());
        let task = Task {
            op,
            waits: waits.to_vec(),
            signal: signal.clone(),
        };
        trace!(queue = self.inner.id.0, op = task.op.kind(), waits = waits.len(), "enqueue op");
        let sender = self.inner.sender.lock().unwrap();
        if let Some(sender) = sender.as_ref() {
            // The worker outlives every external handle, so this only fails
            // during teardown, where the event is simply dropped unsignaled.
            let _ = sender.send(task);
        }
        signal
    }

    /// Record-free fill, like a one-op submission.
    pub fn enqueue_fill_buffer(
        &self,
        dst: &MemBuffer,
        pattern: &[u8],
        offset: usize,
        len: usize,
        waits: &[Event],
    ) -> Result<Event, QueueError> {
        self.check_buffer(dst)?;
        Ok(self.enqueue_op(
            QueueOp::FillBuffer {
                dst: dst.clone(),
                pattern: pattern.to_vec(),
                offset,
                len,
            },
            waits,
        ))
    }

    pub fn enqueue_copy_buffer(
        &self,
        src: &MemBuffer,
        dst: &MemBuffer,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        waits: &[Event],
    ) -> Result<Event, QueueError> {
        self.check_buffer(src)?;
        self.check_buffer(dst)?;
        Ok(self.enqueue_op(
            QueueOp::CopyBuffer {
                src: src.clone(),
                dst: dst.clone(),
                src_offset,
                dst_offset,
                len,
            },
            waits,
        ))
    }

    pub fn enqueue_write_buffer(
        &self,
        dst: &MemBuffer,
        offset: usize,
        bytes: &[u8],
        waits: &[Event],
    ) -> Result<Event, QueueError> {
        self.check_buffer(dst)?;
        Ok(self.enqueue_op(
            QueueOp::WriteBuffer {
                dst: dst.clone(),
                offset,
                bytes: bytes.to_vec(),
            },
            waits,
        ))
    }

    /// Blocking read: waits for `waits` and all previously enqueued ops,
    /// then copies `src[offset..]` into `dest`.
    pub fn enqueue_read_buffer(
        &self,
        src: &MemBuffer,
        offset: usize,
        dest: &mut [u8],
        waits: &[Event],
    ) -> Result<(), QueueError> {
        self.check_buffer(src)?;
        self.enqueue_op(QueueOp::Marker, waits).wait()?;
        src.read(offset, dest)
    }

    /// A marker op completing after `waits` and all prior ops on this queue.
    pub fn enqueue_marker(&self, waits: &[Event]) -> Event {
        self.enqueue_op(QueueOp::Marker, waits)
    }

    /// Dispatch `kernel` over `global_size` items with its *current*
    /// argument bindings.
    pub fn enqueue_dispatch(
        &self,
        kernel: &Kernel,
        global_size: usize,
        waits: &[Event],
    ) -> Result<Event, QueueError> {
        if kernel.context_id() != self.context_id() {
            return Err(QueueError::WrongContext);
        }
        Ok(self.enqueue_op(
            QueueOp::Dispatch {
                kernel_name: kernel.name().to_owned(),
                body: kernel.body_handle(),
                args: kernel.args_snapshot(),
                global_size,
            },
            waits,
        ))
    }

    /// Submission hygiene hook; the host backend dispatches eagerly, so
    /// there is nothing to push.
    pub fn flush(&self) {}

    /// Block until every op enqueued so far has completed.
    pub fn finish(&self) -> Result<(), QueueError> {
        self.enqueue_marker(&[]).wait()
    }

    fn check_buffer(&self, buffer: &MemBuffer) -> Result<(), QueueError> {
        if buffer.context_id() != self.context_id() {
            return Err(QueueError::WrongContext);
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device.id())
            .field("context", &self.context_id())
            .field("props", &self.inner.props)
            .finish()
    }
}

fn worker_loop(id: QueueId, receiver: mpsc::Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        let result = match Event::wait_all(&task.waits) {
            Ok(()) => {
                let result = task.op.execute();
                if let Err(err) = &result {
                    trace!(queue = id.0, op = task.op.kind(), %err, "op failed");
                }
                result
            }
            Err(err) => Err(QueueError::DependencyFailed(err.to_string())),
        };
        task.signal.signal(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceDesc;

    fn setup() -> (Context, Device, CommandQueue) {
        let device = Device::new(DeviceDesc::default());
        let context = Context::new(&[device.clone()]);
        let queue = CommandQueue::new(&context, &device, QueueProps::empty()).unwrap();
        (context, device, queue)
    }

    #[test]
    fn ops_execute_in_fifo_order() {
        let (context, _, queue) = setup();
        let buf = MemBuffer::new(&context, 4);

        queue.enqueue_fill_buffer(&buf, &[1], 0, 4, &[]).unwrap();
        queue.enqueue_fill_buffer(&buf, &[2], 0, 4, &[]).unwrap();

        let mut out = [0u8; 4];
        queue.enqueue_read_buffer(&buf, 0, &mut out, &[]).unwrap();
        assert_eq!(out, [2; 4]);
    }

    #[test]
    fn user_event_gates_execution() {
        let (context, _, queue) = setup();
        let buf = MemBuffer::new(&context, 4);
        let gate = Event::user_event(&context);

        let fill = queue
            .enqueue_fill_buffer(&buf, &[7], 0, 4, &[gate.clone()])
            .unwrap();
        assert!(fill.status().is_none());
        assert_eq!(buf.snapshot(), [0; 4]);

        gate.set_complete().unwrap();
        fill.wait().unwrap();
        assert_eq!(buf.snapshot(), [7; 4]);
    }

    #[test]
    fn failed_dependency_fails_dependent_op() {
        let (context, _, queue) = setup();
        let buf = MemBuffer::new(&context, 4);
        let gate = Event::user_event(&context);
        gate.set_failed(QueueError::EmptyPattern).unwrap();

        let fill = queue
            .enqueue_fill_buffer(&buf, &[7], 0, 4, &[gate])
            .unwrap();
        assert!(matches!(fill.wait(), Err(QueueError::DependencyFailed(_))));
        assert_eq!(buf.snapshot(), [0; 4]);
    }

    #[test]
    fn execution_error_surfaces_through_event() {
        let (context, _, queue) = setup();
        let buf = MemBuffer::new(&context, 4);

        let fill = queue.enqueue_fill_buffer(&buf, &[7], 0, 8, &[]).unwrap();
        assert_eq!(
            fill.wait(),
            Err(QueueError::BufferOutOfBounds { offset: 0, len: 8, size: 4 })
        );
    }

    #[test]
    fn wrong_context_buffer_is_rejected_at_enqueue() {
        let (_, _, queue) = setup();
        let other = Context::new(&[Device::new(DeviceDesc::default())]);
        let buf = MemBuffer::new(&other, 4);
        assert_eq!(
            queue.enqueue_fill_buffer(&buf, &[1], 0, 4, &[]).unwrap_err(),
            QueueError::WrongContext
        );
    }

    #[test]
    fn dispatch_runs_kernel_with_snapshotted_args() {
        let (context, _, queue) = setup();
        let src = MemBuffer::new(&context, 4);
        let dst = MemBuffer::new(&context, 4);
        src.fill(&[0x16], 0, 4).unwrap();

        let copy = Kernel::new(&context, "copy", |dispatch| {
            let src = dispatch.buffer(0)?;
            let dst = dispatch.buffer(1)?;
            let mut scratch = vec![0u8; dispatch.global_size];
            src.read(0, &mut scratch)?;
            dst.write(0, &scratch)
        });
        copy.set_arg(0, KernelArg::Buffer(src)).unwrap();
        copy.set_arg(1, KernelArg::Buffer(dst.clone())).unwrap();

        queue.enqueue_dispatch(&copy, 4, &[]).unwrap();
        queue.finish().unwrap();
        assert_eq!(dst.snapshot(), [0x16; 4]);
    }

    #[test]
    fn substitution_compatibility_checks_device_and_props() {
        let device = Device::new(DeviceDesc::default());
        let context = Context::new(&[device.clone()]);
        let plain = CommandQueue::new(&context, &device, QueueProps::empty()).unwrap();
        let profiling = CommandQueue::new(&context, &device, QueueProps::PROFILING).unwrap();

        // A property superset may substitute; a subset may not.
        assert!(profiling.can_substitute_for(&plain));
        assert!(!plain.can_substitute_for(&profiling));

        let other_device = Device::new(DeviceDesc::default());
        let other_context = Context::new(&[other_device.clone()]);
        let foreign = CommandQueue::new(&other_context, &other_device, QueueProps::empty()).unwrap();
        assert!(!foreign.can_substitute_for(&plain));
    }
}
