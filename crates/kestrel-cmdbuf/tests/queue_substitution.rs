//! Replaying a buffer on queues supplied at submission time.

mod common;

use common::{assert_all_equal, Fixture};
use kestrel_cmdbuf::CmdBufError;
use kestrel_queue::{CommandQueue, Context, Device, DeviceDesc, QueueProps};

#[test]
fn compatible_substitute_executes_the_buffer() {
    let fx = Fixture::new();
    let buffer = fx.create_buffer(&[]);
    fx.record_copy(&buffer);
    buffer.finalize().unwrap();

    let substitute = CommandQueue::new(&fx.context, &fx.device, QueueProps::empty()).unwrap();
    fx.fill_input(0x21);
    fx.queue.finish().unwrap();

    let done = buffer.enqueue(&[substitute.clone()], None).unwrap();
    done.wait().unwrap();
    assert_all_equal(&fx.read_output(), 0x21);

    // The original queue saw nothing after the input fill; the substitute
    // has drained the whole submission.
    substitute.finish().unwrap();
}

#[test]
fn property_superset_substitutes_subset_does_not() {
    let device = Device::new(DeviceDesc::default());
    let context = Context::new(&[device.clone()]);
    let profiling = CommandQueue::new(&context, &device, QueueProps::PROFILING).unwrap();
    let plain = CommandQueue::new(&context, &device, QueueProps::empty()).unwrap();

    let buffer = kestrel_cmdbuf::CommandBuffer::create(&[profiling.clone()], &[]).unwrap();
    buffer.finalize().unwrap();

    // Fewer properties than the bound queue: rejected.
    assert_eq!(
        buffer.enqueue(&[plain], None).unwrap_err(),
        CmdBufError::IncompatibleCommandQueue { slot: 0 }
    );
    // Same queue again (trivially a superset): accepted.
    buffer.enqueue(&[profiling], None).unwrap().wait().unwrap();
}

#[test]
fn different_device_is_incompatible() {
    // Two devices inside one context, so only the device differs.
    let device = Device::new(DeviceDesc::default());
    let other_device = Device::new(DeviceDesc::default());
    let context = Context::new(&[device.clone(), other_device.clone()]);
    let queue = CommandQueue::new(&context, &device, QueueProps::empty()).unwrap();
    let cross_device = CommandQueue::new(&context, &other_device, QueueProps::empty()).unwrap();

    let buffer = kestrel_cmdbuf::CommandBuffer::create(&[queue], &[]).unwrap();
    buffer.finalize().unwrap();
    assert_eq!(
        buffer.enqueue(&[cross_device], None).unwrap_err(),
        CmdBufError::IncompatibleCommandQueue { slot: 0 }
    );
}

#[test]
fn same_device_foreign_context_fails_with_invalid_context() {
    // Two contexts over one device: substitution compatibility passes, the
    // context check is what rejects it.
    let device = Device::new(DeviceDesc::default());
    let context_a = Context::new(&[device.clone()]);
    let context_b = Context::new(&[device.clone()]);
    let queue_a = CommandQueue::new(&context_a, &device, QueueProps::empty()).unwrap();
    let queue_b = CommandQueue::new(&context_b, &device, QueueProps::empty()).unwrap();

    let buffer = kestrel_cmdbuf::CommandBuffer::create(&[queue_a], &[]).unwrap();
    buffer.finalize().unwrap();
    assert_eq!(
        buffer.enqueue(&[queue_b], None).unwrap_err(),
        CmdBufError::InvalidContext
    );
}
