//! CPU utilization from the aggregate `cpu` line of `/proc/stat`.

use super::CounterReadError;
use std::path::PathBuf;

/// Idle and total jiffies at one instant. Idle includes iowait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

pub fn parse_proc_stat(text: &str) -> Result<CpuTimes, String> {
    let line = text
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| "no aggregate cpu line".to_string())?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>().map_err(|_| format!("bad counter {v:?}")))
        .collect::<Result<Vec<_>, _>>()?;
    if fields.len() < 5 {
        return Err(format!("expected at least 5 counters, got {}", fields.len()));
    }

    Ok(CpuTimes {
        idle: fields[3] + fields[4],
        total: fields.iter().sum(),
    })
}

/// Utilization between two readings, in percent.
pub fn utilization_between(prev: CpuTimes, cur: CpuTimes) -> f64 {
    let d_total = cur.total.saturating_sub(prev.total);
    if d_total == 0 {
        return 0.0;
    }
    let d_idle = cur.idle.saturating_sub(prev.idle) as f64;
    (100.0 * (1.0 - d_idle / d_total as f64)).clamp(0.0, 100.0)
}

#[derive(Debug)]
pub struct CpuSampler {
    path: PathBuf,
    baseline: Option<CpuTimes>,
}

impl CpuSampler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), baseline: None }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// `Ok(None)` while there is no baseline yet. A counter that went
    /// backwards starts a new baseline and reads as 0.
    pub fn read(&mut self) -> Result<Option<f64>, CounterReadError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| CounterReadError::Io {
            path: self.path.clone(),
            source,
        })?;
        let cur = parse_proc_stat(&text).map_err(|detail| CounterReadError::Parse {
            path: self.path.clone(),
            detail,
        })?;

        let Some(prev) = self.baseline.replace(cur) else {
            return Ok(None);
        };
        if cur.total < prev.total || cur.idle < prev.idle {
            tracing::debug!(path = %self.path.display(), "cpu counters went backwards, new baseline");
            return Ok(Some(0.0));
        }
        Ok(Some(utilization_between(prev, cur)))
    }
}
