//! Embedded reference backends built on `sled`.
//!
//! The source keeps a legacy timeout store together with its migration
//! bookkeeping in one database; the target models a native delayed-delivery
//! store with per-endpoint staging trees.

pub mod codec;
pub mod source;
pub mod target;
