pub mod display;
pub mod sync;
