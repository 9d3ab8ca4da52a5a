//! Disk capacity of the data directory.

use std::path::Path;
use tracing::debug;

use crate::types::DiskCapacity;

const BYTES_PER_GB: f64 = 1_000_000_000.0;

/// Total and available space of the filesystem holding `path`, in GB.
///
/// `path` may not exist yet; the nearest existing ancestor is queried.
/// Both fields are `None` when the figures cannot be determined.
pub fn disk_capacity(path: &Path) -> DiskCapacity {
    let Some(existing) = path.ancestors().find(|p| p.exists()) else {
        return DiskCapacity::default();
    };
    match statvfs_bytes(existing) {
        Ok((total, available)) => DiskCapacity {
            total: Some(round2(total as f64 / BYTES_PER_GB)),
            available: Some(round2(available as f64 / BYTES_PER_GB)),
        },
        Err(e) => {
            debug!(path = %existing.display(), error = %e, "Disk capacity unavailable");
            DiskCapacity::default()
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(unix)]
fn statvfs_bytes(path: &Path) -> Result<(u64, u64), String> {
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|e| e.to_string())?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };

    if result == 0 {
        let stat = unsafe { stat.assume_init() };
        #[allow(clippy::useless_conversion)]
        let frsize = u64::from(stat.f_frsize);
        #[allow(clippy::useless_conversion)]
        let (blocks, avail) = (u64::from(stat.f_blocks), u64::from(stat.f_bavail));
        Ok((blocks * frsize, avail * frsize))
    } else {
        Err(format!("statvfs failed for {}", path.display()))
    }
}

#[cfg(not(unix))]
fn statvfs_bytes(path: &Path) -> Result<(u64, u64), String> {
    Err(format!("disk capacity not supported for {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_capacity_of_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cap = disk_capacity(dir.path());
        let total = cap.total.unwrap();
        let available = cap.available.unwrap();
        assert!(total > 0.0);
        assert!(available <= total);
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_path_uses_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let cap = disk_capacity(&dir.path().join("not/yet/created"));
        assert!(cap.total.is_some());
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.23456), 1.23);
    }
}
