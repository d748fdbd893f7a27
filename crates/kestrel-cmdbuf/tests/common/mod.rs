//! Shared fixture for the command-buffer integration tests: one device,
//! context and in-order queue, an input/output buffer pair, and a `copy`
//! kernel moving `i32` elements from input to output.

#![allow(dead_code)]

use kestrel_cmdbuf::{CmdBufError, CommandBuffer, CommandBufferProp, DispatchDesc, SyncPointId};
use kestrel_queue::{
    CommandQueue, Context, Device, DeviceCaps, DeviceDesc, Kernel, KernelArg, MemBuffer,
    QueueProps,
};

pub const NUM_ELEMENTS: usize = 64;
pub const ELEM_SIZE: usize = std::mem::size_of::<i32>();
pub const DATA_SIZE: usize = NUM_ELEMENTS * ELEM_SIZE;

pub struct Fixture {
    pub device: Device,
    pub context: Context,
    pub queue: CommandQueue,
    pub in_mem: MemBuffer,
    pub out_mem: MemBuffer,
    pub kernel: Kernel,
}

/// Route engine tracing into the test harness output (`RUST_LOG` selects
/// the level). Safe to call from every test; only the first init wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_caps(DeviceCaps::all())
    }

    pub fn with_caps(caps: DeviceCaps) -> Self {
        init_tracing();
        let device = Device::new(DeviceDesc {
            name: "host".to_owned(),
            caps,
            supported_queue_props: QueueProps::all(),
        });
        let context = Context::new(&[device.clone()]);
        let queue = CommandQueue::new(&context, &device, QueueProps::empty()).unwrap();
        let in_mem = MemBuffer::new(&context, DATA_SIZE);
        let out_mem = MemBuffer::new(&context, DATA_SIZE);
        let kernel = copy_kernel(&context);
        kernel.set_arg(0, KernelArg::Buffer(in_mem.clone())).unwrap();
        kernel
            .set_arg(1, KernelArg::Buffer(out_mem.clone()))
            .unwrap();

        Self {
            device,
            context,
            queue,
            in_mem,
            out_mem,
            kernel,
        }
    }

    pub fn create_buffer(&self, props: &[CommandBufferProp]) -> CommandBuffer {
        CommandBuffer::create(&[self.queue.clone()], props).unwrap()
    }

    /// Record one copy dispatch over the whole element range.
    pub fn record_copy(&self, buffer: &CommandBuffer) -> SyncPointId {
        self.record_copy_checked(buffer).unwrap()
    }

    /// Fallible variant of [`record_copy`](Self::record_copy).
    pub fn record_copy_checked(
        &self,
        buffer: &CommandBuffer,
    ) -> Result<SyncPointId, CmdBufError> {
        buffer.record_dispatch(
            None,
            &DispatchDesc {
                kernel: &self.kernel,
                global_size: NUM_ELEMENTS,
            },
            None,
        )
    }

    /// Fill `in_mem` with an `i32` pattern through the queue.
    pub fn fill_input(&self, pattern: i32) {
        self.queue
            .enqueue_fill_buffer(&self.in_mem, &pattern.to_le_bytes(), 0, DATA_SIZE, &[])
            .unwrap();
    }

    /// Blocking read of `out_mem` as `i32` elements.
    pub fn read_output(&self) -> Vec<i32> {
        read_elements(&self.queue, &self.out_mem)
    }
}

/// The parallel-copy kernel from the fixture: `out[i] = in[i]`.
pub fn copy_kernel(context: &Context) -> Kernel {
    Kernel::new(context, "copy", |dispatch| {
        let src = dispatch.buffer(0)?;
        let dst = dispatch.buffer(1)?;
        let mut bytes = vec![0u8; dispatch.global_size * ELEM_SIZE];
        src.read(0, &mut bytes)?;
        dst.write(0, &bytes)
    })
}

/// Blocking read of a whole buffer as `i32` elements.
pub fn read_elements(queue: &CommandQueue, buffer: &MemBuffer) -> Vec<i32> {
    let mut bytes = vec![0u8; buffer.len()];
    queue.enqueue_read_buffer(buffer, 0, &mut bytes, &[]).unwrap();
    bytes
        .chunks_exact(ELEM_SIZE)
        .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Assert every element equals `expected`.
pub fn assert_all_equal(data: &[i32], expected: i32) {
    for (index, &value) in data.iter().enumerate() {
        assert_eq!(value, expected, "mismatch at element {index}");
    }
}
