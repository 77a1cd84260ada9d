use tracing::debug;
use windows::core::*;
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Gdi::HBRUSH;
use windows::Win32::UI::WindowsAndMessaging::*;

use super::window::wndproc;
use crate::error::RenderResult;

pub const WINDOW_CLASS_NAME: PCWSTR = w!("BindlessRendererWindow");

/// Registers the renderer's window class. Registering it twice is fine.
pub fn register_window_class(instance: HMODULE) -> RenderResult<()> {
    let wc = WNDCLASSEXW {
        cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
        style: CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(wndproc),
        hInstance: instance.into(),
        hCursor: unsafe { LoadCursorW(None, IDC_ARROW)? },
        hbrBackground: HBRUSH::default(),
        lpszClassName: WINDOW_CLASS_NAME,
        ..Default::default()
    };

    let atom = unsafe { RegisterClassExW(&wc) };
    if atom == 0 {
        let e = Error::from_win32();
        if e.code() == ERROR_CLASS_ALREADY_EXISTS.to_hresult() {
            debug!("window class already registered");
            return Ok(());
        }
        return Err(e.into());
    }
    Ok(())
}
