use std::ptr::NonNull;

use tracing::{debug, info};
use windows::core::*;
use windows::Win32::Foundation::*;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Input::KeyboardAndMouse::VK_ESCAPE;
use windows::Win32::UI::WindowsAndMessaging::*;

use super::window_class::{register_window_class, WINDOW_CLASS_NAME};
use crate::error::{RenderError, RenderResult};
use crate::frame_loop::{WindowEvents, WindowState};

/// Per-window state the window procedure writes into.
#[derive(Debug)]
struct WindowData {
    width: u32,
    height: u32,
    quit_requested: bool,
    destroyed: bool,
}

pub struct Win32Window {
    hwnd: HWND,
    data: NonNull<WindowData>,
}

impl Win32Window {
    /// Creates a hidden overlapped window whose client area is `size`.
    pub fn create(title: &str, size: (u32, u32)) -> RenderResult<Self> {
        let instance = unsafe { GetModuleHandleW(None)? };
        register_window_class(instance)?;

        let mut window_rect = RECT {
            left: 0,
            top: 0,
            right: size.0 as i32,
            bottom: size.1 as i32,
        };
        unsafe { AdjustWindowRect(&mut window_rect, WS_OVERLAPPEDWINDOW, false)? };

        let data = NonNull::from(Box::leak(Box::new(WindowData {
            width: size.0,
            height: size.1,
            quit_requested: false,
            destroyed: false,
        })));

        let hwnd = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                WINDOW_CLASS_NAME,
                &HSTRING::from(title),
                WS_OVERLAPPEDWINDOW,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                window_rect.right - window_rect.left,
                window_rect.bottom - window_rect.top,
                None,
                None,
                Some(instance.into()),
                Some(data.as_ptr() as *const _),
            )
        };
        let hwnd = match hwnd {
            Ok(hwnd) => hwnd,
            Err(e) => {
                // SAFETY: the window was never created, nothing else points at `data`.
                drop(unsafe { Box::from_raw(data.as_ptr()) });
                return Err(RenderError::from(e));
            }
        };

        info!(title, width = size.0, height = size.1, "window created");
        Ok(Self { hwnd, data })
    }

    pub fn hwnd(&self) -> HWND {
        self.hwnd
    }

    pub fn show(&self) {
        unsafe { _ = ShowWindow(self.hwnd, SW_SHOW) };
    }

    fn data(&self) -> &WindowData {
        // SAFETY: owned by `self` and only written by the window procedure, which
        // runs on this thread during `poll`.
        unsafe { self.data.as_ref() }
    }
}

impl WindowEvents for Win32Window {
    fn poll(&mut self) -> RenderResult<WindowState> {
        let mut quit_posted = false;
        let mut message = MSG::default();
        while unsafe { PeekMessageW(&mut message, None, 0, 0, PM_REMOVE) }.as_bool() {
            if message.message == WM_QUIT {
                quit_posted = true;
            }
            unsafe {
                _ = TranslateMessage(&message);
                DispatchMessageW(&message);
            }
        }

        let data = self.data();
        Ok(WindowState {
            width: data.width,
            height: data.height,
            quit_requested: quit_posted || data.quit_requested,
        })
    }
}

impl Drop for Win32Window {
    fn drop(&mut self) {
        if !self.data().destroyed {
            if let Err(e) = unsafe { DestroyWindow(self.hwnd) } {
                debug!("DestroyWindow failed: {e}");
            }
        }
        // SAFETY: leaked in `create`; the window procedure no longer sees it once
        // the window is destroyed.
        drop(unsafe { Box::from_raw(self.data.as_ptr()) });
    }
}

pub(super) extern "system" fn wndproc(
    window: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if message == WM_CREATE {
        unsafe {
            let create_struct: &CREATESTRUCTW = &*(lparam.0 as *const CREATESTRUCTW);
            SetWindowLongPtrW(window, GWLP_USERDATA, create_struct.lpCreateParams as _);
        }
        return LRESULT(0);
    }

    let user_data = unsafe { GetWindowLongPtrW(window, GWLP_USERDATA) };
    // Messages can arrive before WM_CREATE or after WM_DESTROY.
    let Some(mut data) = NonNull::new(user_data as *mut WindowData) else {
        return unsafe { DefWindowProcW(window, message, wparam, lparam) };
    };
    let data = unsafe { data.as_mut() };

    match message {
        WM_KEYDOWN if wparam.0 == VK_ESCAPE.0 as usize => {
            data.quit_requested = true;
            LRESULT(0)
        }
        WM_SIZE => {
            data.width = (lparam.0 & 0xffff) as u32;
            data.height = ((lparam.0 >> 16) & 0xffff) as u32;
            LRESULT(0)
        }
        // The window is destroyed when Win32Window drops, after the GPU is drained.
        WM_CLOSE => {
            data.quit_requested = true;
            LRESULT(0)
        }
        WM_DESTROY => {
            data.quit_requested = true;
            data.destroyed = true;
            unsafe {
                SetWindowLongPtrW(window, GWLP_USERDATA, 0);
                PostQuitMessage(0);
            }
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(window, message, wparam, lparam) },
    }
}
