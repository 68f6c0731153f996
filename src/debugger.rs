//! Debugger detection
//!
//! A debugger can pause threads mid-drop and hold references in its own frames,
//! which looks exactly like a leak. Checks are deferred while one is attached.

use tracing::debug;

/// Reports whether a debugger is attached to this process
pub trait DebuggerControl: Send + Sync {
    fn is_debugger_attached(&self) -> bool;
}

/// Always reports no debugger
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDebugger;

impl DebuggerControl for NoDebugger {
    fn is_debugger_attached(&self) -> bool {
        false
    }
}

/// Reads `TracerPid` from `/proc/self/status`. Reports `false` where procfs
/// is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcStatusDebuggerControl;

impl DebuggerControl for ProcStatusDebuggerControl {
    fn is_debugger_attached(&self) -> bool {
        match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => parse_tracer_pid(&status).is_some_and(|pid| pid != 0),
            Err(e) => {
                debug!("Cannot read process status for debugger detection: {}", e);
                false
            }
        }
    }
}

/// Extract the `TracerPid:` value from a procfs status document
pub fn parse_tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tracer_pid() {
        let status = "Name:\tleakwatch\nState:\tS (sleeping)\nTracerPid:\t4242\nUid:\t1000\n";
        assert_eq!(parse_tracer_pid(status), Some(4242));

        let untraced = "Name:\tleakwatch\nTracerPid:\t0\n";
        assert_eq!(parse_tracer_pid(untraced), Some(0));

        assert_eq!(parse_tracer_pid("Name:\tleakwatch\n"), None);
        assert_eq!(parse_tracer_pid("TracerPid:\tgarbage\n"), None);
    }

    #[test]
    fn test_no_debugger() {
        assert!(!NoDebugger.is_debugger_attached());
    }
}
