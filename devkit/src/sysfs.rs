/*!
Fake kernel counter trees

A temp directory laid out like the bits of `/proc` and `/sys` the sampler
reads. Counters are plain files, so tests move them forward (or backward,
to simulate a reset) between reads.
*/

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct FakeSysfs {
    root: TempDir,
}

impl FakeSysfs {
    pub fn new() -> Result<Self> {
        let root = tempfile::tempdir()?;
        fs::create_dir_all(root.path().join("proc"))?;
        fs::create_dir_all(root.path().join("powercap/intel-rapl:0"))?;
        fs::create_dir_all(root.path().join("hwmon"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn proc_stat(&self) -> PathBuf {
        self.root().join("proc/stat")
    }

    pub fn rapl_energy(&self) -> PathBuf {
        self.root().join("powercap/intel-rapl:0/energy_uj")
    }

    pub fn hwmon_root(&self) -> PathBuf {
        self.root().join("hwmon")
    }

    /// Write an aggregate `cpu` line with the given busy and idle jiffies.
    /// Busy time goes to `user`, idle is split between `idle` and `iowait`.
    pub fn set_cpu(&self, busy: u64, idle: u64) -> Result<()> {
        let iowait = idle / 4;
        let line = format!(
            "cpu  {busy} 0 0 {} {iowait} 0 0 0 0 0\ncpu0 {busy} 0 0 {} {iowait} 0 0 0 0 0\nintr 0\n",
            idle - iowait,
            idle - iowait
        );
        fs::write(self.proc_stat(), line)?;
        Ok(())
    }

    pub fn set_rapl_energy(&self, microjoules: u64) -> Result<()> {
        fs::write(self.rapl_energy(), format!("{microjoules}\n"))?;
        Ok(())
    }

    /// Add an hwmon device `hwmon<index>` reporting `name`.
    pub fn add_hwmon(&self, index: u32, name: &str) -> Result<PathBuf> {
        let dir = self.hwmon_root().join(format!("hwmon{index}"));
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("name"), format!("{name}\n"))?;
        Ok(dir)
    }

    /// Set `power<rail>_input` (microwatts) on an hwmon device.
    pub fn set_hwmon_power(&self, dir: &Path, rail: u32, microwatts: u64) -> Result<()> {
        fs::write(dir.join(format!("power{rail}_input")), format!("{microwatts}\n"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_parsable_cpu_line() {
        let fake = FakeSysfs::new().unwrap();
        fake.set_cpu(300, 700).unwrap();
        let text = fs::read_to_string(fake.proc_stat()).unwrap();
        let first = text.lines().next().unwrap();
        let total: u64 = first.split_whitespace().skip(1).map(|v| v.parse::<u64>().unwrap()).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn lays_out_hwmon_device() {
        let fake = FakeSysfs::new().unwrap();
        let dir = fake.add_hwmon(3, "zenpower").unwrap();
        fake.set_hwmon_power(&dir, 1, 15_000_000).unwrap();
        assert_eq!(fs::read_to_string(dir.join("name")).unwrap().trim(), "zenpower");
        assert!(dir.join("power1_input").exists());
    }
}
