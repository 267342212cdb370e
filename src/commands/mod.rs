pub mod timer;
pub mod utils;

pub use timer::{init, pin_check, pin_set, start};
