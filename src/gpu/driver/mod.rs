//! Backend-agnostic intermediate representation: opcodes, the state cache
//! replay diffs against, and the identities it borrows from resources.

pub mod command;
pub mod state;
pub mod types;
