pub mod lifecycle;
pub mod process;
pub mod recording;
