use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const UNKNOWN_FILESYSTEM: &str = "unknown";

const DISK_FILESYSTEMS: &[&str] = &[
    "ext4", "ext3", "ext2", "xfs", "btrfs", "ntfs", "fuseblk", "ntfs-3g", "vfat", "exfat",
];
const PSEUDO_MOUNTS: &[&str] = &["/proc", "/sys", "/dev", "/run"];
const DF_TIMEOUT: Duration = Duration::from_secs(5);
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMount {
    pub device: String,
    pub path: String,
    pub filesystem: String,
}

/// Best-effort filesystem type of the volume backing `path`, as reported by
/// `df -T`. Any failure along the way, including `df` hanging for more than
/// five seconds on an unresponsive mount, yields [`UNKNOWN_FILESYSTEM`].
pub fn detect_filesystem<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();
    let mut command = Command::new("df");
    command.arg("-T").arg(path);

    run_with_timeout(&mut command, DF_TIMEOUT)
        .and_then(|stdout| parse_df_output(&stdout))
        .unwrap_or_else(|| UNKNOWN_FILESYSTEM.to_string())
}

/// Stdout of `command` if it exits successfully within `timeout`. A child that
/// overruns is killed and reaped.
fn run_with_timeout(command: &mut Command, timeout: Duration) -> Option<String> {
    let spawned = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            tracing::warn!(command = ?command, "failed to spawn: {err}");
            return None;
        }
    };

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                tracing::warn!(command = ?command, ?timeout, "command timed out, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Ok(None) => thread::sleep(CHILD_POLL_INTERVAL),
            Err(err) => {
                tracing::warn!(command = ?command, "failed to wait on child: {err}");
                let _ = child.kill();
                return None;
            }
        }
    };

    if !status.success() {
        tracing::warn!(command = ?command, %status, "command exited unsuccessfully");
        return None;
    }

    let mut stdout = String::new();
    child.stdout.take()?.read_to_string(&mut stdout).ok()?;
    Some(stdout)
}

/// Type column of `df -T` output. Long device names may push the remaining
/// columns onto a continuation line, so everything after the header is treated
/// as one whitespace-separated row.
fn parse_df_output(stdout: &str) -> Option<String> {
    let mut lines = stdout.lines();
    lines.next()?;
    let body: Vec<&str> = lines.flat_map(str::split_whitespace).collect();
    body.get(1).map(|fs_type| fs_type.to_string())
}

/// Disk-backed mounts currently visible in `/proc/mounts`.
pub fn list_system_mounts() -> Vec<SystemMount> {
    match fs::read_to_string("/proc/mounts") {
        Ok(text) => parse_mounts(&text),
        Err(err) => {
            tracing::warn!("error reading mount points: {err}");
            Vec::new()
        }
    }
}

pub fn parse_mounts(text: &str) -> Vec<SystemMount> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device = parts.next()?;
            let mount_point = parts.next()?;
            let fs_type = parts.next()?;
            if !DISK_FILESYSTEMS.contains(&fs_type) || PSEUDO_MOUNTS.contains(&mount_point) {
                return None;
            }
            Some(SystemMount {
                device: device.to_string(),
                path: unescape_mount_path(mount_point),
                filesystem: fs_type.to_string(),
            })
        })
        .collect()
}

// /proc/mounts encodes space, tab, newline and backslash as three-digit octal escapes.
fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_type_column() {
        let stdout = "Filesystem     Type 1K-blocks    Used Available Use% Mounted on\n\
                      /dev/nvme0n1p2 ext4 491135216 1234567 465000000   1% /\n";
        assert_eq!(parse_df_output(stdout).as_deref(), Some("ext4"));
    }

    #[test]
    fn parses_wrapped_df_row() {
        let stdout = "Filesystem Type 1K-blocks Used Available Use% Mounted on\n\
                      /dev/mapper/very-long-volume-group-name\n\
                      xfs 1000 10 990 1% /srv\n";
        assert_eq!(parse_df_output(stdout).as_deref(), Some("xfs"));
    }

    #[test]
    fn header_only_output_is_none() {
        assert_eq!(parse_df_output("Filesystem Type\n"), None);
        assert_eq!(parse_df_output(""), None);
    }

    #[test]
    fn missing_path_is_unknown() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does/not/exist");
        assert_eq!(detect_filesystem(missing), UNKNOWN_FILESYSTEM);
    }

    #[test]
    fn detection_never_returns_empty() {
        let dir = tempdir().unwrap();
        assert!(!detect_filesystem(dir.path()).is_empty());
    }

    #[test]
    fn hung_command_is_killed_at_the_deadline() {
        let mut command = Command::new("sleep");
        command.arg("10");

        let started = Instant::now();
        assert_eq!(run_with_timeout(&mut command, Duration::from_millis(200)), None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn quick_command_output_is_returned() {
        let mut command = Command::new("echo");
        command.arg("ext4");
        assert_eq!(
            run_with_timeout(&mut command, Duration::from_secs(5)).as_deref(),
            Some("ext4\n")
        );
    }

    #[test]
    fn keeps_only_disk_mounts() {
        let text = "\
sysfs /sys sysfs rw,nosuid 0 0
proc /proc proc rw 0 0
/dev/sda1 / ext4 rw,relatime 0 0
/dev/sdb1 /mnt/Windows\\040Disk fuseblk rw 0 0
tmpfs /run tmpfs rw 0 0
/dev/sdc1 /dev xfs rw 0 0
garbage
";
        let mounts = parse_mounts(text);
        assert_eq!(
            mounts,
            vec![
                SystemMount {
                    device: "/dev/sda1".into(),
                    path: "/".into(),
                    filesystem: "ext4".into(),
                },
                SystemMount {
                    device: "/dev/sdb1".into(),
                    path: "/mnt/Windows Disk".into(),
                    filesystem: "fuseblk".into(),
                },
            ]
        );
    }
}
