//! The Win32 window the Direct3D 12 backend presents into.

pub mod window;
pub mod window_class;

pub use window::Win32Window;
