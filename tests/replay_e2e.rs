//! End-to-end: the full record → finalize → replay → verify loop across
//! both crates, driven the way a conformance harness would drive it.

use pretty_assertions::assert_eq;

use kestrel::cmdbuf::{
    BufferState, CommandBuffer, CommandBufferInfo, CommandBufferProp, DispatchDesc,
};
use kestrel::queue::{
    CommandQueue, Context, Device, DeviceCaps, DeviceDesc, Event, Kernel, KernelArg, MemBuffer,
    QueueProps,
};

const NUM_ELEMENTS: usize = 128;
const DATA_SIZE: usize = NUM_ELEMENTS * 4;

struct World {
    context: Context,
    queue: CommandQueue,
    in_mem: MemBuffer,
    out_mem: MemBuffer,
    kernel: Kernel,
}

impl World {
    fn new() -> Self {
        let device = Device::new(DeviceDesc {
            name: "conformance-host".to_owned(),
            caps: DeviceCaps::SIMULTANEOUS_USE,
            supported_queue_props: QueueProps::all(),
        });
        let context = Context::new(&[device.clone()]);
        let queue = CommandQueue::new(&context, &device, QueueProps::empty()).unwrap();
        let in_mem = MemBuffer::new(&context, DATA_SIZE);
        let out_mem = MemBuffer::new(&context, DATA_SIZE);

        let kernel = Kernel::new(&context, "copy", |dispatch| {
            let src = dispatch.buffer(0)?;
            let dst = dispatch.buffer(1)?;
            let mut bytes = vec![0u8; dispatch.global_size * 4];
            src.read(0, &mut bytes)?;
            dst.write(0, &bytes)
        });
        kernel.set_arg(0, KernelArg::Buffer(in_mem.clone())).unwrap();
        kernel.set_arg(1, KernelArg::Buffer(out_mem.clone())).unwrap();

        Self {
            context,
            queue,
            in_mem,
            out_mem,
            kernel,
        }
    }

    fn read_output(&self) -> Vec<i32> {
        let mut bytes = vec![0u8; DATA_SIZE];
        self.queue
            .enqueue_read_buffer(&self.out_mem, 0, &mut bytes, &[])
            .unwrap();
        // The byte vec has no alignment guarantee, so gather instead of cast.
        bytemuck::pod_collect_to_vec::<u8, i32>(&bytes)
    }
}

#[test]
fn conformance_style_record_replay_verify() {
    let world = World::new();
    let buffer = CommandBuffer::create(
        &[world.queue.clone()],
        &[CommandBufferProp::SimultaneousUse],
    )
    .unwrap();

    // Record: barrier-free single dispatch, then freeze.
    buffer
        .record_dispatch(
            None,
            &DispatchDesc {
                kernel: &world.kernel,
                global_size: NUM_ELEMENTS,
            },
            None,
        )
        .unwrap();
    buffer.finalize().unwrap();

    // Introspection reflects the compiled buffer.
    assert_eq!(buffer.state().unwrap(), BufferState::Executable);
    assert_eq!(buffer.num_queues().unwrap(), 1);
    let mut state_word = [0u8; 4];
    buffer
        .get_info(CommandBufferInfo::State, Some(&mut state_word))
        .unwrap();
    assert_eq!(u32::from_le_bytes(state_word), BufferState::Executable.code());

    // Replay three times with fresh inputs; user events gate the last run.
    for pattern in [0x16, 0x2A, -7] {
        world
            .queue
            .enqueue_fill_buffer(&world.in_mem, &i32::to_le_bytes(pattern), 0, DATA_SIZE, &[])
            .unwrap();
        let gate = Event::user_event(&world.context);
        let done = buffer.enqueue(&[], Some(&[gate.clone()])).unwrap();
        assert!(done.status().is_none());
        gate.set_complete().unwrap();
        done.wait().unwrap();

        assert_eq!(world.read_output(), vec![pattern; NUM_ELEMENTS]);
    }

    // Retain/release bookkeeping, then tear the buffer down.
    buffer.retain().unwrap();
    assert_eq!(buffer.reference_count().unwrap(), 2);
    buffer.release().unwrap();
    buffer.release().unwrap();
    assert!(buffer.state().is_err());
}

#[test]
fn release_during_flight_defers_destruction() {
    let world = World::new();
    let buffer = CommandBuffer::create(&[world.queue.clone()], &[]).unwrap();
    buffer
        .record_dispatch(
            None,
            &DispatchDesc {
                kernel: &world.kernel,
                global_size: NUM_ELEMENTS,
            },
            None,
        )
        .unwrap();
    buffer.finalize().unwrap();

    let gate = Event::user_event(&world.context);
    let done = buffer.enqueue(&[], Some(&[gate.clone()])).unwrap();

    // Drop the last logical reference while the submission is in flight:
    // the buffer must stay alive until the submission drains.
    buffer.release().unwrap();
    assert_eq!(buffer.state().unwrap(), BufferState::Pending);

    gate.set_complete().unwrap();
    done.wait().unwrap();

    // The completion callback performed the deferred destroy.
    assert!(buffer.state().is_err());
}
