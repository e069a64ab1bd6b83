pub mod frame_bridge;
pub mod frame_queue;
pub mod frame_source_adapter;
pub mod log_capture;
pub mod ring_buffer;
pub mod segment_window;
