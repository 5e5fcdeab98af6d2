use core::fmt;
use core::num::NonZeroUsize;

pub const KIBI: u64 = 1024;
pub const MEBI: u64 = KIBI * 1024;
pub const GIBI: u64 = MEBI * 1024;
pub const TEBI: u64 = GIBI * 1024;

/**
Binary (IEC) human-readable byte count.

Plain bytes print as an integer (`"512 B"`); anything larger scales to
one decimal place (`"1.2 KiB"`, `"8.0 GiB"`). The impl honours the
formatter's width/alignment flags, so `{:>10}` gives the fixed-width
column the report uses.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanSize(pub u64);

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
        let bytes = self.0;
        if bytes < KIBI {
            return f.pad(&format!("{bytes} B"));
        }
        let mut value = bytes as f64 / 1024.0;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        f.pad(&format!("{value:.1} {}", UNITS[unit]))
    }
}

/**
Raises the process file-descriptor soft limit to the hard limit.

The pool opens a descriptor per in-flight listing and the default soft
limit (often 1024) is easy to exhaust on wide trees. Failure is
non-fatal: affected nodes surface as `ProcessFdQuotaExceeded` records.
*/
pub fn raise_fd_limit() {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: valid pointer to an rlimit out-param
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        tracing::warn!("getrlimit(RLIMIT_NOFILE) failed, keeping the default fd limit");
        return;
    }
    if limit.rlim_cur >= limit.rlim_max {
        return;
    }
    limit.rlim_cur = limit.rlim_max;
    // SAFETY: valid pointer to the populated rlimit
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        tracing::warn!(
            soft = limit.rlim_cur,
            hard = limit.rlim_max,
            "could not raise RLIMIT_NOFILE, deep trees may hit the fd quota"
        );
    }
}

/// Default pool width: CPU count x 2.5 (the workers spend most of their
/// time blocked in syscalls), clamped to the pool's hard cap.
#[must_use]
pub fn default_threads() -> NonZeroUsize {
    let cpus = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    let workers = (cpus * 5 / 2).clamp(1, crate::pool::MAX_WORKERS);
    NonZeroUsize::new(workers).unwrap_or(NonZeroUsize::MIN)
}
