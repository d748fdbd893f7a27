//! Umbrella crate for the kestrel workspace: a command-buffer execution
//! engine ([`cmdbuf`]) over a host-side queue capability layer ([`queue`]).
//!
//! Most users depend on the member crates directly; this package anchors
//! the workspace's shared end-to-end tests.

pub use kestrel_cmdbuf as cmdbuf;
pub use kestrel_queue as queue;
