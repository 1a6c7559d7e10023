pub mod bluetooth;
pub mod frame_source;
pub mod logging;
