//! Disk space checking.
//!
//! A worker about to start a download checks the output device first so an
//! already-full disk fails fast with the terminal `StorageExhausted`
//! outcome instead of streaming megabytes into a write error.

use crate::error::{Error, Result};
use std::path::Path;

/// Fail with [`Error::StorageExhausted`] when fewer than `min_bytes` are
/// available on the device backing `path`.
///
/// A failed space query is logged and ignored: the write itself still
/// classifies ENOSPC, so the preflight is an optimization, not a gate.
pub fn ensure_free_space(path: &Path, min_bytes: u64) -> Result<()> {
    match available_space(path) {
        Ok(available) if available < min_bytes => {
            tracing::error!(
                path = %path.display(),
                available,
                required = min_bytes,
                "output device below free-space threshold"
            );
            Err(Error::StorageExhausted {
                path: path.to_path_buf(),
            })
        }
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "disk space check failed, continuing");
            Ok(())
        }
    }
}

/// Get available disk space for a given path.
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Unix: statvfs
/// - Windows: GetDiskFreeSpaceExW
pub fn available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid null-terminated C string, stat is zeroed
        // before the call, and the struct is only read after a successful
        // return.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            // f_bavail is available blocks for unprivileged users,
            // f_frsize the fragment size
            Ok(stat.f_bavail.saturating_mul(stat.f_frsize))
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is null-terminated and the output pointers refer
        // to valid, aligned u64 variables read only after a successful call.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }
            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "disk space checking is not supported on this platform",
        ))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn available_space_on_valid_path() {
        let temp_dir = TempDir::new().unwrap();
        let available = available_space(temp_dir.path()).unwrap();
        assert!(available > 0);
    }

    #[test]
    fn ensure_free_space_passes_with_zero_threshold() {
        let temp_dir = TempDir::new().unwrap();
        assert!(ensure_free_space(temp_dir.path(), 0).is_ok());
    }

    #[test]
    fn ensure_free_space_fails_with_absurd_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let err = ensure_free_space(temp_dir.path(), u64::MAX).unwrap_err();
        assert!(err.is_storage_exhausted());
    }

    #[test]
    fn ensure_free_space_ignores_query_failure() {
        // nonexistent path makes statvfs fail; the preflight must not block
        assert!(ensure_free_space(Path::new("/nonexistent/definitely/missing"), 1).is_ok());
    }
}
