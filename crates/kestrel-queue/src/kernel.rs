use std::fmt;
use std::sync::{Arc, Mutex};

use crate::context::{Context, ContextId};
use crate::error::QueueError;
use crate::memory::{MemBuffer, MemImage};

/// One bound kernel argument.
#[derive(Debug, Clone)]
pub enum KernelArg {
    Buffer(MemBuffer),
    Image(MemImage),
    /// Raw bytes of a by-value argument.
    Scalar(Vec<u8>),
}

impl KernelArg {
    /// Context the argument's resource belongs to, if it carries one.
    pub fn context_id(&self) -> Option<ContextId> {
        match self {
            KernelArg::Buffer(buffer) => Some(buffer.context_id()),
            KernelArg::Image(image) => Some(image.context_id()),
            KernelArg::Scalar(_) => None,
        }
    }
}

/// Everything a kernel body sees for one dispatch: the global work size and
/// the argument bindings frozen for this dispatch occurrence.
pub struct DispatchArgs<'a> {
    pub global_size: usize,
    pub args: &'a [KernelArg],
}

impl DispatchArgs<'_> {
    /// Typed accessor for a buffer argument.
    pub fn buffer(&self, index: usize) -> Result<&MemBuffer, QueueError> {
        match self.args.get(index) {
            Some(KernelArg::Buffer(buffer)) => Ok(buffer),
            _ => Err(QueueError::InvalidKernelArg {
                index,
                len: self.args.len(),
            }),
        }
    }

    /// Typed accessor for an image argument.
    pub fn image(&self, index: usize) -> Result<&MemImage, QueueError> {
        match self.args.get(index) {
            Some(KernelArg::Image(image)) => Ok(image),
            _ => Err(QueueError::InvalidKernelArg {
                index,
                len: self.args.len(),
            }),
        }
    }

    /// Typed accessor for a scalar argument's raw bytes.
    pub fn scalar(&self, index: usize) -> Result<&[u8], QueueError> {
        match self.args.get(index) {
            Some(KernelArg::Scalar(bytes)) => Ok(bytes),
            _ => Err(QueueError::InvalidKernelArg {
                index,
                len: self.args.len(),
            }),
        }
    }
}

/// Kernel body: runs once per dispatch over the whole global range.
pub type KernelFn = dyn Fn(&DispatchArgs<'_>) -> Result<(), QueueError> + Send + Sync;

struct KernelInner {
    context: ContextId,
    name: String,
    body: Arc<KernelFn>,
    /// Live bindings mutated by `set_arg`; dispatch recording snapshots them.
    args: Mutex<Vec<KernelArg>>,
}

/// A compiled-elsewhere kernel, represented as a named host closure plus its
/// current argument bindings.
///
/// `set_arg` updates the live binding set. Consumers that need per-occurrence
/// argument values (the command-buffer engine does) snapshot the bindings at
/// the point of use via [`args_snapshot`](Self::args_snapshot); later
/// `set_arg` calls do not affect snapshots already taken.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    pub fn new(
        context: &Context,
        name: impl Into<String>,
        body: impl Fn(&DispatchArgs<'_>) -> Result<(), QueueError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(KernelInner {
                context: context.id(),
                name: name.into(),
                body: Arc::new(body),
                args: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.inner.context
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Shared handle to the kernel body. Consumers pair this with an
    /// argument snapshot to freeze a dispatch occurrence.
    pub fn body_handle(&self) -> Arc<KernelFn> {
        self.inner.body.clone()
    }

    /// Bind argument `index`. Binding the next unused index appends; binding
    /// an existing index replaces it; anything further out is an error.
    pub fn set_arg(&self, index: usize, arg: KernelArg) -> Result<(), QueueError> {
        let mut args = self.inner.args.lock().unwrap();
        match index.cmp(&args.len()) {
            std::cmp::Ordering::Less => args[index] = arg,
            std::cmp::Ordering::Equal => args.push(arg),
            std::cmp::Ordering::Greater => {
                return Err(QueueError::InvalidKernelArg {
                    index,
                    len: args.len(),
                })
            }
        }
        Ok(())
    }

    /// The current bindings, frozen into an independent copy.
    pub fn args_snapshot(&self) -> Vec<KernelArg> {
        self.inner.args.lock().unwrap().clone()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.inner.name)
            .field("context", &self.inner.context)
            .finish()
    }
}
