//! The FUSE operation layer for ocffs: path resolution, metadata overlay,
//! caller classification, the xattr control plane, the virtual/physical
//! state-transition engine, and the op dispatch table built on top of them.

pub mod classify;
pub mod driver;
pub mod io;
pub mod overlay;
pub mod resolve;
pub mod transition;
pub mod xattr;

pub use driver::{mount, MountContext, OcffsFs};
