//! Data types for items, children, classification records, and runs.

pub mod classification;
pub mod comment;
pub mod item;
pub mod run;
