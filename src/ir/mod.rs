//! Replay of recorded command lists against a backend context.

pub mod replayer;

pub use replayer::{ReplayContext, Replayer};
