//! The submission engine: binds a finalized buffer to concrete queues and
//! external waits, then drives queue-level enqueues in dependency order.
//!
//! A submission is ephemeral — per-command events, substituted queues and
//! the completion marker live only for one `enqueue` call — so any number
//! of submissions of a simultaneous-use buffer can run these walks
//! concurrently against the shared, immutable compiled command list.

use tracing::{debug, trace};

use kestrel_queue::{CommandQueue, Event, QueueOp};

use crate::buffer::{BufferState, CommandBuffer, CommandBufferProps};
use crate::command::Command;
use crate::error::CmdBufError;

impl CommandBuffer {
    /// Submit the compiled buffer.
    ///
    /// `queues` is either empty (replay on the originally bound queues) or
    /// exactly one concrete queue per bound slot, each compatible with the
    /// original at that slot. `waits` gates the submission's dependency-free
    /// commands on externally supplied events.
    ///
    /// Returns immediately with the submission's completion handle; errors
    /// during execution surface through that handle, not here.
    pub fn enqueue(
        &self,
        queues: &[CommandQueue],
        waits: Option<&[Event]>,
    ) -> Result<Event, CmdBufError> {
        self.inner.ensure_alive()?;
        let simultaneous = self
            .inner
            .props
            .contains(CommandBufferProps::SIMULTANEOUS_USE);

        let mut rec = self.inner.rec.lock().unwrap();
        match rec.state {
            BufferState::Recording => {
                return Err(CmdBufError::InvalidOperation(
                    "the buffer has not been finalized",
                ))
            }
            BufferState::Pending => {
                return Err(CmdBufError::InvalidOperation(
                    "a non-simultaneous buffer cannot be enqueued while pending",
                ))
            }
            BufferState::Executable => {}
        }

        let concrete: Vec<CommandQueue> = if queues.is_empty() {
            self.inner.queues.clone()
        } else {
            if queues.len() != self.inner.queues.len() {
                return Err(CmdBufError::InvalidValue(
                    "substitute queue count must match the buffer's queue count",
                ));
            }
            for (slot, (queue, original)) in queues.iter().zip(&self.inner.queues).enumerate() {
                if !queue.can_substitute_for(original) {
                    return Err(CmdBufError::IncompatibleCommandQueue { slot });
                }
                if queue.context_id() != self.inner.context.id() {
                    return Err(CmdBufError::InvalidContext);
                }
            }
            queues.to_vec()
        };

        let external: Vec<Event> = match waits {
            None => Vec::new(),
            Some([]) => return Err(CmdBufError::InvalidEventWaitList),
            Some(list) => {
                if list
                    .iter()
                    .any(|event| event.context_id() != self.inner.context.id())
                {
                    return Err(CmdBufError::InvalidContext);
                }
                list.to_vec()
            }
        };

        let compiled = rec
            .compiled
            .clone()
            .ok_or(CmdBufError::InvalidOperation("the buffer has no compiled schedule"))?;

        // Validation is done; from here on the submission cannot fail. Flip
        // a non-simultaneous buffer to Pending before releasing the lock so
        // a racing enqueue observes it.
        if !simultaneous {
            debug_assert!(rec.state.can_transition_to(BufferState::Pending));
            rec.state = BufferState::Pending;
        }
        self.inner.in_flight.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
        drop(rec);

        debug!(
            buffer = self.inner.id,
            commands = compiled.commands.len(),
            substituted = !queues.is_empty(),
            simultaneous,
            "enqueue command buffer"
        );

        // Per the queue-slot routing decision, every command dispatches on
        // slot 0; the remaining slots only participate in validation.
        let submission_queue = &concrete[0];

        let command_count = compiled.commands.len();
        let mut events: Vec<Option<Event>> = vec![None; command_count];
        for &cmd_index in &compiled.schedule.order {
            let record = &compiled.commands[cmd_index as usize];
            let deps = &compiled.schedule.deps[cmd_index as usize];

            // Dependency-free commands inherit the external wait list; the
            // rest are transitively gated through their producers.
            let wait_events: Vec<Event> = if deps.is_empty() {
                external.clone()
            } else {
                deps.iter()
                    .filter_map(|&producer| events[producer as usize].clone())
                    .collect()
            };
            debug_assert!(deps.is_empty() || wait_events.len() == deps.len());

            trace!(
                buffer = self.inner.id,
                command = cmd_index,
                kind = record.command.kind(),
                signals = record.signal.0,
                waits = wait_events.len(),
                "dispatch recorded command"
            );
            let event = submission_queue.enqueue_op(translate(&record.command), &wait_events);
            events[cmd_index as usize] = Some(event);
        }

        // The completion handle: a marker behind every command of the
        // submission (or just the external waits for an empty buffer).
        let command_events: Vec<Event> = events.into_iter().flatten().collect();
        let completion = if command_events.is_empty() {
            submission_queue.enqueue_op(QueueOp::Marker, &external)
        } else {
            submission_queue.enqueue_op(QueueOp::Marker, &command_events)
        };

        let inner = self.inner.clone();
        completion.on_complete(move |_| {
            // Runs on the queue worker. Revert Pending even on failure so
            // the caller can correct inputs and resubmit.
            if !simultaneous {
                let mut rec = inner.rec.lock().unwrap();
                debug_assert_eq!(rec.state, BufferState::Pending);
                debug_assert!(rec.state.can_transition_to(BufferState::Executable));
                rec.state = BufferState::Executable;
            }
            inner
                .in_flight
                .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
            inner.try_destroy();
        });

        Ok(completion)
    }
}

/// Lower one recorded command to the queue layer's native op. Everything the
/// op needs was frozen at record time, so this is a pure clone.
fn translate(command: &Command) -> QueueOp {
    match command {
        Command::KernelDispatch {
            kernel_name,
            body,
            args,
            global_size,
        } => QueueOp::Dispatch {
            kernel_name: kernel_name.clone(),
            body: body.clone(),
            args: args.clone(),
            global_size: *global_size,
        },
        Command::FillBuffer {
            dst,
            pattern,
            offset,
            len,
        } => QueueOp::FillBuffer {
            dst: dst.clone(),
            pattern: pattern.clone(),
            offset: *offset,
            len: *len,
        },
        Command::CopyBuffer {
            src,
            dst,
            src_offset,
            dst_offset,
            len,
        } => QueueOp::CopyBuffer {
            src: src.clone(),
            dst: dst.clone(),
            src_offset: *src_offset,
            dst_offset: *dst_offset,
            len: *len,
        },
        Command::CopyBufferRect { src, dst, rect } => QueueOp::CopyBufferRect {
            src: src.clone(),
            dst: dst.clone(),
            rect: *rect,
        },
        Command::FillImage {
            dst,
            pattern,
            origin,
            region,
        } => QueueOp::FillImage {
            dst: dst.clone(),
            pattern: pattern.clone(),
            origin: *origin,
            region: *region,
        },
        Command::CopyImage {
            src,
            dst,
            src_origin,
            dst_origin,
            region,
        } => QueueOp::CopyImage {
            src: src.clone(),
            dst: dst.clone(),
            src_origin: *src_origin,
            dst_origin: *dst_origin,
            region: *region,
        },
        Command::CopyImageToBuffer {
            src,
            dst,
            origin,
            region,
            dst_offset,
        } => QueueOp::CopyImageToBuffer {
            src: src.clone(),
            dst: dst.clone(),
            origin: *origin,
            region: *region,
            dst_offset: *dst_offset,
        },
        Command::CopyBufferToImage {
            src,
            dst,
            src_offset,
            origin,
            region,
        } => QueueOp::CopyBufferToImage {
            src: src.clone(),
            dst: dst.clone(),
            src_offset: *src_offset,
            origin: *origin,
            region: *region,
        },
        Command::Barrier => QueueOp::Marker,
    }
}
