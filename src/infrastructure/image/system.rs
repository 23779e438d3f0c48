//! Host resource probes used to size the cache tiers at startup.

use std::path::Path;

use tracing::warn;

/// Memory budget assumed when detection fails (1 GB).
const FALLBACK_AVAILABLE_MEMORY: u64 = 1024 * 1024 * 1024;

/// Reports free space on the filesystem holding a path.
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to unprivileged writers at `path`.
    ///
    /// # Errors
    /// Returns error if the filesystem cannot be queried.
    fn available_space(&self, path: &Path) -> std::io::Result<u64>;
}

/// Queries the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_space(&self, path: &Path) -> std::io::Result<u64> {
        statvfs_available(path)
    }
}

/// Reports a fixed amount of free space. Useful to force the disk tier on or off.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_space(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(self.0)
    }
}

#[cfg(unix)]
#[allow(clippy::unnecessary_cast)] // statvfs field types vary by platform
fn statvfs_available(path: &Path) -> std::io::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // SAFETY: c_path is NUL-terminated and stat points to writable memory
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };

    if result == 0 {
        // SAFETY: statvfs succeeded, stat is now initialized
        let stat = unsafe { stat.assume_init() };
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn statvfs_available(_path: &Path) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "statvfs not available on this platform",
    ))
}

/// Detect the memory currently available to the process, in bytes.
///
/// Reads `MemAvailable` from `/proc/meminfo` on Linux, falling back to
/// `MemTotal`, then to a fixed 1 GB.
pub fn detect_available_memory() -> u64 {
    match read_meminfo() {
        Some(bytes) => bytes,
        None => {
            warn!(
                fallback = FALLBACK_AVAILABLE_MEMORY,
                "Could not detect available memory, using fallback"
            );
            FALLBACK_AVAILABLE_MEMORY
        }
    }
}

#[cfg(target_os = "linux")]
fn read_meminfo() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&content, "MemAvailable:").or_else(|| parse_meminfo(&content, "MemTotal:"))
}

#[cfg(not(target_os = "linux"))]
fn read_meminfo() -> Option<u64> {
    None
}

/// Parses a `/proc/meminfo` field given in kB and returns bytes.
fn parse_meminfo(content: &str, field: &str) -> Option<u64> {
    // Format: "MemAvailable:   16384000 kB"
    content
        .lines()
        .find(|line| line.starts_with(field))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}
