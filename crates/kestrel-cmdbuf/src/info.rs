//! Read-only queries over a command buffer.
//!
//! Two surfaces over the same data: typed getters for Rust callers, and a
//! size-checked byte-level query (`get_info`) for callers that drive the
//! engine through a foreign ABI. Values encode little-endian at their
//! natural width; querying with no destination returns the required size.

use std::sync::atomic::Ordering;

use kestrel_queue::{CommandQueue, Context};

use crate::buffer::{BufferState, CommandBuffer, CommandBufferProps};
use crate::error::CmdBufError;

/// The queryable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferInfo {
    /// Number of queue slots, as `u32`.
    NumQueues,
    /// Bound queue ids, one `u64` per slot.
    Queues,
    /// Logical reference count, as `u32`.
    ReferenceCount,
    /// Lifecycle state, as `u32` (see [`BufferState::code`]).
    State,
    /// Creation-time property flags, as `u64`.
    Properties,
    /// Owning context id, as `u64`.
    Context,
}

impl BufferState {
    /// Wire encoding of the state for `get_info`.
    pub fn code(self) -> u32 {
        match self {
            BufferState::Recording => 0,
            BufferState::Executable => 1,
            BufferState::Pending => 2,
        }
    }
}

impl CommandBuffer {
    /// Current lifecycle state.
    pub fn state(&self) -> Result<BufferState, CmdBufError> {
        self.inner.ensure_alive()?;
        Ok(self.inner.rec.lock().unwrap().state)
    }

    pub fn num_queues(&self) -> Result<u32, CmdBufError> {
        self.inner.ensure_alive()?;
        Ok(self.inner.queues.len() as u32)
    }

    /// The queue slots captured at creation.
    pub fn queues(&self) -> Result<Vec<CommandQueue>, CmdBufError> {
        self.inner.ensure_alive()?;
        Ok(self.inner.queues.clone())
    }

    pub fn reference_count(&self) -> Result<u32, CmdBufError> {
        self.inner.ensure_alive()?;
        Ok(self.inner.refcount.load(Ordering::Acquire))
    }

    pub fn properties(&self) -> Result<CommandBufferProps, CmdBufError> {
        self.inner.ensure_alive()?;
        Ok(self.inner.props)
    }

    pub fn context(&self) -> Result<Context, CmdBufError> {
        self.inner.ensure_alive()?;
        Ok(self.inner.context.clone())
    }

    /// Byte-level query.
    ///
    /// With `dest: None`, returns the field's size without writing. With a
    /// destination, the slice must be at least the field's natural size
    /// (larger is fine; the tail is left untouched); a shorter slice fails
    /// with `InvalidValue`.
    pub fn get_info(
        &self,
        info: CommandBufferInfo,
        dest: Option<&mut [u8]>,
    ) -> Result<usize, CmdBufError> {
        self.inner.ensure_alive()?;

        let bytes: Vec<u8> = match info {
            CommandBufferInfo::NumQueues => {
                (self.inner.queues.len() as u32).to_le_bytes().to_vec()
            }
            CommandBufferInfo::Queues => self
                .inner
                .queues
                .iter()
                .flat_map(|queue| queue.id().0.to_le_bytes())
                .collect(),
            CommandBufferInfo::ReferenceCount => self
                .inner
                .refcount
                .load(Ordering::Acquire)
                .to_le_bytes()
                .to_vec(),
            CommandBufferInfo::State => self
                .inner
                .rec
                .lock()
                .unwrap()
                .state
                .code()
                .to_le_bytes()
                .to_vec(),
            CommandBufferInfo::Properties => self.inner.props.bits().to_le_bytes().to_vec(),
            CommandBufferInfo::Context => self.inner.context.id().0.to_le_bytes().to_vec(),
        };

        match dest {
            None => Ok(bytes.len()),
            Some(dest) => {
                if dest.len() < bytes.len() {
                    return Err(CmdBufError::InvalidValue(
                        "destination is smaller than the queried field",
                    ));
                }
                dest[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
        }
    }
}
