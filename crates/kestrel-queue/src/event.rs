use std::sync::{Arc, Condvar, Mutex};

use crate::context::{Context, ContextId};
use crate::error::QueueError;

type Callback = Box<dyn FnOnce(&Result<(), QueueError>) + Send>;

struct EventState {
    /// `None` while the operation is still pending.
    status: Option<Result<(), QueueError>>,
    /// Set while callbacks run, before `status` is published. Waiters keep
    /// blocking until callbacks have finished, so anything a callback does
    /// (state reverts, refcount bookkeeping) happens before `wait` returns.
    signaling: bool,
    callbacks: Vec<Callback>,
}

struct EventInner {
    context: ContextId,
    is_user: bool,
    state: Mutex<EventState>,
    cond: Condvar,
}

/// Completion handle for one enqueued operation (or, for user events, a
/// host-controlled gate).
///
/// An event transitions exactly once from pending to a terminal status:
/// complete or failed. Waiters block until the transition; registered
/// callbacks run exactly once, on the thread that signals the event (or
/// inline if the event is already terminal when the callback is added).
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn new(context: ContextId) -> Self {
        Self::with_kind(context, false)
    }

    /// Create a host-signaled event. The caller completes (or fails) it via
    /// [`set_complete`](Self::set_complete) / [`set_failed`](Self::set_failed);
    /// queue operations can wait on it like on any other event.
    pub fn user_event(context: &Context) -> Self {
        Self::with_kind(context.id(), true)
    }

    fn with_kind(context: ContextId, is_user: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                context,
                is_user,
                state: Mutex::new(EventState {
                    status: None,
                    signaling: false,
                    callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.inner.context
    }

    pub fn is_user_event(&self) -> bool {
        self.inner.is_user
    }

    /// Terminal status, or `None` while still pending.
    pub fn status(&self) -> Option<Result<(), QueueError>> {
        self.inner.state.lock().unwrap().status.clone()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status(), Some(Ok(())))
    }

    /// Block until the event reaches a terminal status and return it.
    pub fn wait(&self) -> Result<(), QueueError> {
        let mut state = self.inner.state.lock().unwrap();
        while state.status.is_none() {
            state = self.inner.cond.wait(state).unwrap();
        }
        state.status.clone().unwrap_or(Ok(()))
    }

    /// Wait for every event in `events`, returning the first failure.
    pub fn wait_all(events: &[Event]) -> Result<(), QueueError> {
        for event in events {
            event.wait()?;
        }
        Ok(())
    }

    /// Run `callback` once the event is terminal. If it already is, the
    /// callback runs on the calling thread before this returns.
    pub fn on_complete(&self, callback: impl FnOnce(&Result<(), QueueError>) + Send + 'static) {
        let mut state = self.inner.state.lock().unwrap();
        match state.status.clone() {
            Some(status) => {
                drop(state);
                callback(&status);
            }
            None => state.callbacks.push(Box::new(callback)),
        }
    }

    /// Complete a user event. Fails on non-user events and on events that
    /// were already signaled.
    pub fn set_complete(&self) -> Result<(), QueueError> {
        self.signal_user(Ok(()))
    }

    /// Fail a user event with `error`; waiters observe the error.
    pub fn set_failed(&self, error: QueueError) -> Result<(), QueueError> {
        self.signal_user(Err(error))
    }

    fn signal_user(&self, status: Result<(), QueueError>) -> Result<(), QueueError> {
        if !self.inner.is_user {
            return Err(QueueError::NotUserEvent);
        }
        if !self.try_signal(status) {
            return Err(QueueError::UserEventAlreadySignaled);
        }
        Ok(())
    }

    /// Move the event to a terminal status. Returns false if it already was
    /// (or is currently being) signaled.
    ///
    /// Callbacks run first, then the status becomes visible to waiters and
    /// `status()`. A callback registered while this runs is picked up on the
    /// next drain round.
    pub(crate) fn try_signal(&self, status: Result<(), QueueError>) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        if state.signaling || state.status.is_some() {
            return false;
        }
        state.signaling = true;
        loop {
            let callbacks = std::mem::take(&mut state.callbacks);
            if callbacks.is_empty() {
                break;
            }
            drop(state);
            for callback in callbacks {
                callback(&status);
            }
            state = self.inner.state.lock().unwrap();
        }
        state.status = Some(status);
        self.inner.cond.notify_all();
        true
    }

    pub(crate) fn signal(&self, status: Result<(), QueueError>) {
        let signaled = self.try_signal(status);
        debug_assert!(signaled, "event signaled twice");
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("context", &self.inner.context)
            .field("is_user", &self.inner.is_user)
            .field("status", &self.status())
            .finish()
    }
}
