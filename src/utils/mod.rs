pub mod handle;
pub mod registry;

pub use handle::{Handle, Pool};
pub use registry::Registry;
