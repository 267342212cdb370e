pub mod common;

pub use common::{atomic_write, atomic_write_private};
