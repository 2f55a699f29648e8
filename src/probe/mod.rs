//! Foreground-window inspection. [GenericProbe] is the single swappable
//! provider the tracker polls; everything platform specific stays behind it.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

use std::{path::Path, sync::Arc};

use anyhow::Result;

/// What the platform reported about the focused window. Either side can be
/// missing: a locked screen, a desktop without a focused window, or a
/// process the probe isn't allowed to inspect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForegroundInfo {
    /// Short application name, e.g. 'firefox' or 'code.exe'.
    pub app: Option<Arc<str>>,
    /// Window title, e.g. 'main.rs - focusd - Code'.
    pub title: Option<Arc<str>>,
}

impl ForegroundInfo {
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Contract every platform probe implements. Must return within a couple of
/// seconds; a failed lookup is an `Err`, an inconclusive one is
/// [ForegroundInfo::unknown].
#[cfg_attr(test, mockall::automock)]
pub trait ForegroundProbe: Send + 'static {
    fn get_foreground_info(&mut self) -> Result<ForegroundInfo>;
}

/// Turns a full executable path into the short app name sessions are keyed
/// by.
pub fn app_name_from_path(path: &str) -> Arc<str> {
    Path::new(path)
        .file_name()
        .map(|v| Arc::from(v.to_string_lossy().as_ref()))
        .unwrap_or_else(|| path.into())
}

/// Cross-platform [ForegroundProbe] choosing the implementation compiled in.
pub struct GenericProbe {
    inner: Box<dyn ForegroundProbe>,
}

impl GenericProbe {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                Ok(Self {
                    inner: Box::new(win::WindowsProbe::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                Ok(Self {
                    inner: Box::new(x11::X11Probe::new()?),
                })
            }
            else {
                // This runtime error is needed to allow the project to be compiled for during testing.
                unimplemented!("No foreground probe was specified")
            }
        }
    }
}

impl ForegroundProbe for GenericProbe {
    fn get_foreground_info(&mut self) -> Result<ForegroundInfo> {
        self.inner.get_foreground_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_name_strips_directories() {
        assert_eq!(&*app_name_from_path("/usr/bin/firefox"), "firefox");
        assert_eq!(&*app_name_from_path("code.exe"), "code.exe");
    }
}
