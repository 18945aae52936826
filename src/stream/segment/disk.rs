//! Filesystem probing for free space and allocation unit size.

use std::path::Path;

use tracing::warn;

use crate::stream::common::error::{Result, StreamError};

/// Sector size used when the filesystem cannot be queried.
pub const FALLBACK_SECTOR_SIZE: u32 = 512;

#[cfg(unix)]
fn stat(path: &Path) -> Option<libc::statvfs> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: statvfs only writes into the zeroed struct we own.
    let mut out: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut out) };
    (rc == 0).then_some(out)
}

/// Bytes available to unprivileged writers on the filesystem holding
/// `dir`, or `None` if it cannot be determined.
#[cfg(unix)]
pub fn available_space(dir: &Path) -> Option<u64> {
    let st = stat(dir)?;
    Some((st.f_bavail as u64).saturating_mul(st.f_frsize as u64))
}

#[cfg(not(unix))]
pub fn available_space(_dir: &Path) -> Option<u64> {
    None
}

/// Preferred I/O block size of the filesystem holding `dir`.
#[cfg(unix)]
pub fn sector_size(dir: &Path) -> Option<u32> {
    let st = stat(dir)?;
    u32::try_from(st.f_bsize).ok().filter(|&size| size > 0)
}

#[cfg(not(unix))]
pub fn sector_size(_dir: &Path) -> Option<u32> {
    None
}

/// Refuses a write of `required` bytes that would leave less than
/// `margin` bytes free. Unknown free space passes.
pub fn ensure_space(dir: &Path, required: u64, margin: u64) -> Result<()> {
    if margin == 0 {
        return Ok(());
    }
    let Some(available) = available_space(dir) else {
        return Ok(());
    };
    let needed = required.saturating_add(margin);
    if available < needed {
        warn!(
            "Refusing write to {}: {} bytes needed, {} available",
            dir.display(),
            needed,
            available
        );
        return Err(StreamError::DiskNotEnoughSpace {
            required: needed,
            available,
        });
    }
    Ok(())
}
