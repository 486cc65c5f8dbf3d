//! Host-derived paths and constants.

/// Agent configuration directory on Windows hosts.
static CONFIG_DIR_WINDOWS: &str = r"C:\Program Files\Google\OSConfig";
/// Agent configuration directory on Linux hosts.
static CONFIG_DIR_LINUX: &str = "/etc/osconfig";

static TASK_STATE_FILE: &str = "osconfig_task.state";
static RESTART_FILE: &str = "osconfig_agent_restart_required";

/// Host OS family, selecting between the two path layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    Windows,
}

impl OsFamily {
    /// OS family of the running host.
    pub fn current() -> Self {
        if cfg!(windows) {
            OsFamily::Windows
        } else {
            OsFamily::Linux
        }
    }

    fn config_path(self, file: &str) -> String {
        match self {
            OsFamily::Windows => format!(r"{}\{}", CONFIG_DIR_WINDOWS, file),
            OsFamily::Linux => format!("{}/{}", CONFIG_DIR_LINUX, file),
        }
    }
}

/// Location of the task state file.
pub fn task_state_file(family: OsFamily) -> String {
    family.config_path(TASK_STATE_FILE)
}

/// Location of the restart-required marker file.
pub fn restart_file(family: OsFamily) -> String {
    family.config_path(RESTART_FILE)
}

/// Serial port to log to, if any.
///
/// On Linux syslog already writes to the serial console.
pub fn serial_log_port(family: OsFamily) -> &'static str {
    match family {
        OsFamily::Windows => "COM1",
        OsFamily::Linux => "",
    }
}

/// Agent version.
pub fn agent_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_per_family() {
        assert_eq!(
            task_state_file(OsFamily::Linux),
            "/etc/osconfig/osconfig_task.state"
        );
        assert_eq!(
            restart_file(OsFamily::Windows),
            r"C:\Program Files\Google\OSConfig\osconfig_agent_restart_required"
        );
        assert_eq!(serial_log_port(OsFamily::Windows), "COM1");
        assert_eq!(serial_log_port(OsFamily::Linux), "");
    }
}
