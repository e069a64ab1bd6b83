pub mod encoder;
pub mod frame_source;
pub mod report_delegate;
pub mod transport;
