pub mod gpu;
pub mod ir;
pub mod sync;
pub mod utils;

pub use gpu::*;
