use anyhow::Result;
use tracing::error;
use windows::{
    Win32::{
        Foundation::{BOOL, CloseHandle, HANDLE, HWND},
        System::Threading::{
            OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
            QueryFullProcessImageNameW,
        },
        UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId},
    },
    core::PWSTR,
};

use super::{app_name_from_path, ForegroundInfo, ForegroundProbe};

#[tracing::instrument]
fn get_foreground() -> Result<ForegroundInfo> {
    let window = unsafe { GetForegroundWindow() };

    // No foreground window is a legitimate state (logon screen, desktop).
    if window.is_invalid() {
        return Ok(ForegroundInfo::unknown());
    }

    let mut id = 0u32;
    unsafe { GetWindowThreadProcessId(window, Some(&mut id)) };

    let mut text: [u16; 4096] = [0; 4096];

    let app = if id == 0 {
        None
    } else {
        match query_process_path(id, &mut text) {
            Ok(path) => Some(app_name_from_path(&path)),
            Err(e) => {
                error!("Failed to resolve process {id}: {e:?}");
                None
            }
        }
    };

    let title = {
        let title = unsafe { get_window_title(window, &mut text) };
        if title.is_empty() { None } else { Some(title.into()) }
    };

    Ok(ForegroundInfo { app, title })
}

fn query_process_path(id: u32, text: &mut [u16]) -> Result<String> {
    let process_handle = unsafe {
        OpenProcess(
            PROCESS_QUERY_INFORMATION | PROCESS_VM_READ,
            BOOL::from(false),
            id,
        )
    }?;
    let path = unsafe { get_window_process_path(process_handle, text) };
    unsafe { CloseHandle(process_handle) }
        .inspect_err(|e| error!("Failed to close handle {e:?}"))?;
    path
}

unsafe fn get_window_process_path(window_handle: HANDLE, text: &mut [u16]) -> Result<String> {
    unsafe {
        let mut length = text.len() as u32;
        QueryFullProcessImageNameW(
            window_handle,
            PROCESS_NAME_WIN32,
            PWSTR(text.as_mut_ptr()),
            &mut length,
        )?;
        Ok(String::from_utf16_lossy(&text[..length as usize]))
    }
}

unsafe fn get_window_title(window_handle: HWND, text: &mut [u16]) -> String {
    let len = unsafe { GetWindowTextW(window_handle, text) };
    String::from_utf16_lossy(&text[..len as usize])
}

pub struct WindowsProbe {}

impl WindowsProbe {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WindowsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ForegroundProbe for WindowsProbe {
    fn get_foreground_info(&mut self) -> Result<ForegroundInfo> {
        get_foreground().inspect_err(|e| error!("Failed to get foreground window {e:?}"))
    }
}
