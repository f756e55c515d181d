//! Resource probe reading Linux procfs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::error::ResourceMonitorError;
use crate::core::monitor::{ResourceProbe, ResourceSnapshot};

/// Cumulative CPU jiffies from the aggregate `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

/// Samples `/proc/stat` and `/proc/meminfo`.
///
/// CPU load is the busy share of jiffies elapsed since the previous sample; the first
/// sample measures since boot.
#[derive(Debug)]
pub struct ProcProbe {
    root: PathBuf,
    last_cpu: Mutex<Option<CpuTimes>>,
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcProbe {
    /// Probe reading from `/proc`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Probe reading `stat` and `meminfo` below `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_cpu: Mutex::new(None),
        }
    }

    fn read(&self, name: &str) -> Result<(String, String), ResourceMonitorError> {
        let path = self.root.join(name);
        let label = path.display().to_string();
        let contents = std::fs::read_to_string(&path).map_err(|source| ResourceMonitorError::Read {
            path: label.clone(),
            source,
        })?;
        Ok((label, contents))
    }

    fn cpu_percent(&self) -> Result<f64, ResourceMonitorError> {
        let (label, stat) = self.read("stat")?;
        let now = parse_cpu_times(&stat).ok_or_else(|| ResourceMonitorError::Parse {
            path: label,
            reason: "missing aggregate cpu line".into(),
        })?;

        let mut last = self.last_cpu.lock();
        let (busy, total) = match *last {
            Some(prev) if now.total > prev.total => {
                (now.busy.saturating_sub(prev.busy), now.total - prev.total)
            }
            _ => (now.busy, now.total),
        };
        *last = Some(now);
        Ok(percent(busy, total))
    }

    fn memory_percents(&self) -> Result<(f64, f64), ResourceMonitorError> {
        let (label, meminfo) = self.read("meminfo")?;
        let fields = parse_meminfo(&meminfo);
        let field = |name: &str| fields.get(name).copied();

        let total = field("MemTotal").ok_or_else(|| ResourceMonitorError::Parse {
            path: label,
            reason: "missing MemTotal".into(),
        })?;
        let available = field("MemAvailable").unwrap_or_else(|| {
            field("MemFree").unwrap_or(0) + field("Buffers").unwrap_or(0) + field("Cached").unwrap_or(0)
        });
        let memory = percent(total.saturating_sub(available), total);

        let swap_total = field("SwapTotal").unwrap_or(0);
        let swap_free = field("SwapFree").unwrap_or(swap_total);
        let swap = percent(swap_total.saturating_sub(swap_free), swap_total);

        Ok((memory, swap))
    }

    /// Root directory being read.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceProbe for ProcProbe {
    fn sample(&self) -> Result<ResourceSnapshot, ResourceMonitorError> {
        let cpu = self.cpu_percent()?;
        let (memory, swap) = self.memory_percents()?;
        Ok(ResourceSnapshot::new(cpu, memory, swap))
    }
}

/// `user nice system idle iowait irq softirq steal`; guest time is already in user.
fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat
        .lines()
        .find(|line| line.split_whitespace().next() == Some("cpu"))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(str::parse::<u64>)
        .collect::<Result<_, _>>()
        .ok()?;
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

/// `Name:   value kB` lines as a map of kB values.
fn parse_meminfo(meminfo: &str) -> HashMap<&str, u64> {
    meminfo
        .lines()
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((name.trim(), value))
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 100.0).clamp(0.0, 100.0)
}
