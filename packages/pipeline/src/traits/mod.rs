//! Core trait abstractions: storage, listing source, remote completion.

pub mod completion;
pub mod source;
pub mod store;
