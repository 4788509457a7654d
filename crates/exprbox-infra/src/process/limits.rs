//! OS-level confinement applied by the runner child to itself.
//!
//! - Address space: `RLIMIT_AS` capped at the current footprint plus the
//!   configured memory limit. Exhaustion makes the allocator abort, which
//!   the host reports as `MEMORY_LIMIT`.
//! - CPU (per execution): `RLIMIT_CPU` re-armed before every execution at
//!   the CPU time used so far plus the execution's timeout. The host timer
//!   normally kills the child first; if it does not, the kernel sends
//!   `SIGXCPU`, which the host reports as `TIMEOUT`.
//! - Filesystem (Linux): a Landlock ruleset that handles every filesystem
//!   access right and grants none. stdio stays usable since it is already
//!   open.

use exprbox_types::config::BridgeConfig;

/// Headroom above the configured limit for the engine itself.
const ENGINE_SLACK_BYTES: u64 = 64 * 1024 * 1024;
/// Extra CPU seconds granted past the timeout, so the host timer wins the race.
const CPU_SLACK_SECS: u64 = 1;

pub fn apply(config: &BridgeConfig) -> anyhow::Result<()> {
    #[cfg(unix)]
    cap_address_space(config.memory_limit_bytes())?;
    #[cfg(not(unix))]
    tracing::warn!(limit_mb = config.memory_limit_mb, "address-space cap not supported on this platform");

    #[cfg(target_os = "linux")]
    deny_filesystem()?;

    Ok(())
}

#[cfg(unix)]
fn cap_address_space(limit: u64) -> anyhow::Result<()> {
    let baseline = current_footprint().unwrap_or(0);
    let cap = baseline
        .saturating_add(limit)
        .saturating_add(ENGINE_SLACK_BYTES);
    let rlim = libc::rlimit {
        rlim_cur: cap as libc::rlim_t,
        rlim_max: cap as libc::rlim_t,
    };
    // SAFETY: `rlim` is a valid, initialized rlimit for the duration of the call.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_AS, &rlim) };
    if rc != 0 {
        anyhow::bail!(
            "setrlimit(RLIMIT_AS) failed: {}",
            std::io::Error::last_os_error()
        );
    }
    tracing::debug!(baseline, cap, "address space capped");
    Ok(())
}

/// Current virtual size of this process, in bytes.
#[cfg(target_os = "linux")]
fn current_footprint() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().next()?.parse().ok()?;
    // SAFETY: sysconf has no preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(page_size).ok().map(|size| pages * size)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn current_footprint() -> Option<u64> {
    None
}

/// Allow the next execution `timeout_ms` of CPU time (rounded up to whole
/// seconds) on top of what this process has already used.
#[cfg(unix)]
pub fn arm_cpu_backstop(timeout_ms: u64) -> anyhow::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `current` is a valid out-pointer for the duration of the call.
    if unsafe { libc::getrlimit(libc::RLIMIT_CPU, &mut current) } != 0 {
        anyhow::bail!(
            "getrlimit(RLIMIT_CPU) failed: {}",
            std::io::Error::last_os_error()
        );
    }
    let soft = cpu_deadline_secs(cpu_seconds_used()?, timeout_ms);
    let rlim = libc::rlimit {
        rlim_cur: (soft as libc::rlim_t).min(current.rlim_max),
        rlim_max: current.rlim_max,
    };
    // SAFETY: `rlim` is a valid, initialized rlimit for the duration of the call.
    if unsafe { libc::setrlimit(libc::RLIMIT_CPU, &rlim) } != 0 {
        anyhow::bail!(
            "setrlimit(RLIMIT_CPU) failed: {}",
            std::io::Error::last_os_error()
        );
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn arm_cpu_backstop(_timeout_ms: u64) -> anyhow::Result<()> {
    Ok(())
}

/// User plus system CPU time consumed by this process, rounded up.
#[cfg(unix)]
fn cpu_seconds_used() -> anyhow::Result<u64> {
    // SAFETY: an all-zero rusage is a valid value for getrusage to overwrite.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: `usage` is a valid out-pointer for the duration of the call.
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } != 0 {
        anyhow::bail!("getrusage failed: {}", std::io::Error::last_os_error());
    }
    let secs = (usage.ru_utime.tv_sec + usage.ru_stime.tv_sec).max(0) as u64;
    let micros = (usage.ru_utime.tv_usec + usage.ru_stime.tv_usec).max(0) as u64;
    Ok(secs + micros.div_ceil(1_000_000))
}

fn cpu_deadline_secs(used_secs: u64, timeout_ms: u64) -> u64 {
    used_secs
        .saturating_add(timeout_ms.div_ceil(1_000))
        .saturating_add(CPU_SLACK_SECS)
}

#[cfg(target_os = "linux")]
fn deny_filesystem() -> anyhow::Result<()> {
    use landlock::{ABI, Access, AccessFs, Ruleset, RulesetAttr, RulesetStatus};

    let abi = ABI::V3;
    let status = Ruleset::default()
        .handle_access(AccessFs::from_all(abi))?
        .create()?
        .restrict_self()?;
    match status.ruleset {
        RulesetStatus::FullyEnforced => {
            tracing::debug!("landlock: filesystem access denied");
        }
        RulesetStatus::PartiallyEnforced => {
            tracing::warn!("landlock partially enforced (older kernel ABI)");
        }
        RulesetStatus::NotEnforced => {
            tracing::warn!("landlock not enforced (kernel may lack Landlock support)");
        }
    }
    Ok(())
}
