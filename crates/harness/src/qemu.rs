//! QEMU process management
//!
//! Builds the hypervisor command line and owns the running process.

use nix::sys::signal::{kill, Signal};
use nix::unistd::{access, AccessFlags, Pid};
use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

use crate::config::QemuConfig;
use sysapi_common::{Error, Result};

/// QEMU launcher for throwaway test machines
pub struct QemuLauncher {
    config: QemuConfig,
}

impl QemuLauncher {
    /// Create a new QEMU launcher
    pub fn new(config: QemuConfig) -> Self {
        Self { config }
    }

    /// Whether hardware acceleration can be used
    pub fn kvm_available(&self) -> bool {
        access(&self.config.kvm_device, AccessFlags::W_OK).is_ok()
    }

    /// Build QEMU command line arguments
    pub fn build_args(&self, image: &Path, seed_iso: &Path, kvm: bool) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            self.config.memory_mb.to_string(),
            image.display().to_string(),
            // Writes go to a temporary overlay, the image itself is never touched
            "-snapshot".to_string(),
            "-cdrom".to_string(),
            seed_iso.display().to_string(),
            "-net".to_string(),
            "nic,model=virtio".to_string(),
            "-net".to_string(),
            format!(
                "user,hostfwd=tcp::{}-:{}",
                self.config.host_forward_port, self.config.guest_ssh_port
            ),
            "-display".to_string(),
            "none".to_string(),
        ];

        if kvm {
            args.push("-enable-kvm".to_string());
        }

        args
    }

    /// Spawn QEMU in the background with its output sent to `log_path`
    pub fn spawn(&self, image: &Path, seed_iso: &Path, log_path: &Path) -> Result<HypervisorProcess> {
        let kvm = self.kvm_available();
        if !kvm {
            debug!(
                "{} is not writable, using software emulation",
                self.config.kvm_device.display()
            );
        }

        let args = self.build_args(image, seed_iso, kvm);
        debug!("QEMU command: {} {}", self.config.binary_path, args.join(" "));

        let log = File::create(log_path)?;
        let child = Command::new(&self.config.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()
            .map_err(|e| {
                Error::Hypervisor(format!(
                    "Failed to spawn {}: {}",
                    self.config.binary_path, e
                ))
            })?;

        info!("QEMU started with PID {}", child.id());
        Ok(HypervisorProcess {
            child,
            reaped: false,
        })
    }
}

/// A running hypervisor, signalled and reaped exactly once.
///
/// Dropping the handle without calling [`terminate`](Self::terminate) still
/// stops the process.
#[derive(Debug)]
pub struct HypervisorProcess {
    child: Child,
    reaped: bool,
}

impl HypervisorProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Whether the process is still running
    pub fn is_running(&mut self) -> bool {
        !self.reaped && matches!(self.child.try_wait(), Ok(None))
    }

    /// Send SIGTERM and wait for the process to exit
    pub fn terminate(&mut self) -> Result<()> {
        if self.reaped {
            return Ok(());
        }

        info!("Stopping QEMU (pid: {})", self.child.id());
        let pid = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            // Already gone; waiting below still reaps it.
            debug!("SIGTERM to {} failed: {}", pid, e);
        }

        self.reaped = true;
        let status = self.child.wait()?;
        debug!("QEMU exited with {}", status);
        Ok(())
    }
}

impl Drop for HypervisorProcess {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("Failed to stop QEMU: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_build_args_without_kvm() {
        let launcher = QemuLauncher::new(QemuConfig::default());
        let args = launcher.build_args(
            Path::new("/images/fedora.qcow2"),
            Path::new("/work/cloud-init.iso"),
            false,
        );
        assert_eq!(
            args,
            [
                "-m",
                "1024",
                "/images/fedora.qcow2",
                "-snapshot",
                "-cdrom",
                "/work/cloud-init.iso",
                "-net",
                "nic,model=virtio",
                "-net",
                "user,hostfwd=tcp::2222-:22",
                "-display",
                "none",
            ]
        );
    }

    #[test]
    fn test_build_args_with_kvm() {
        let launcher = QemuLauncher::new(QemuConfig {
            memory_mb: 2048,
            host_forward_port: 2200,
            ..Default::default()
        });
        let args = launcher.build_args(Path::new("a.qcow2"), Path::new("b.iso"), true);
        assert_eq!(args.last().map(String::as_str), Some("-enable-kvm"));
        assert!(args.contains(&"2048".to_string()));
        assert!(args.contains(&"user,hostfwd=tcp::2200-:22".to_string()));
    }

    #[test]
    fn test_missing_kvm_device_disables_acceleration() {
        let launcher = QemuLauncher::new(QemuConfig {
            kvm_device: PathBuf::from("/nonexistent/kvm"),
            ..Default::default()
        });
        assert!(!launcher.kvm_available());
    }

    #[test]
    fn test_terminate_reaps_once() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let mut process = HypervisorProcess {
            child,
            reaped: false,
        };
        assert!(process.is_running());

        process.terminate().unwrap();
        assert!(!process.is_running());
        process.terminate().unwrap();
    }

    #[test]
    fn test_spawn_failure_is_hypervisor_error() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = QemuLauncher::new(QemuConfig {
            binary_path: "/nonexistent/qemu-system-x86_64".to_string(),
            ..Default::default()
        });
        let err = launcher
            .spawn(
                Path::new("disk.qcow2"),
                Path::new("seed.iso"),
                &dir.path().join("qemu.log"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Hypervisor(_)));
    }
}
