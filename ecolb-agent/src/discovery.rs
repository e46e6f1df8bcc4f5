//! Host identification and sensor discovery
//!
//! - Host id from the system hostname (when not given on the CLI)
//! - hwmon device lookup by driver name (zenpower on AMD hosts)

use std::path::{Path, PathBuf};
use tracing::debug;

/// Hostname of this machine, used as host id by default.
pub fn host_id() -> String {
    gethostname::gethostname().to_string_lossy().trim().to_string()
}

/// First `hwmon*` directory under `root` whose `name` file contains `driver`.
pub fn find_hwmon(root: &Path, driver: &str) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(root) {
        Ok(e) => e,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "hwmon root unreadable");
            return None;
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("hwmon"))
        })
        .collect();
    dirs.sort();

    dirs.into_iter().find(|dir| {
        std::fs::read_to_string(dir.join("name"))
            .map(|name| name.contains(driver))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecolb_devkit::FakeSysfs;

    #[test]
    fn finds_zenpower_among_others() {
        let fake = FakeSysfs::new().unwrap();
        fake.add_hwmon(0, "k10temp").unwrap();
        let zen = fake.add_hwmon(1, "zenpower").unwrap();
        fake.add_hwmon(2, "nvme").unwrap();

        assert_eq!(find_hwmon(&fake.hwmon_root(), "zenpower"), Some(zen));
        assert_eq!(find_hwmon(&fake.hwmon_root(), "coretemp"), None);
    }

    #[test]
    fn missing_root_is_none() {
        assert_eq!(find_hwmon(Path::new("/nonexistent/hwmon"), "zenpower"), None);
    }

    #[test]
    fn hostname_is_not_empty() {
        assert!(!host_id().is_empty());
    }
}
