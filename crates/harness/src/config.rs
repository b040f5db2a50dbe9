//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sysapi_common::{Result, LOGICAL_HOST};

/// Harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory layout
    pub paths: PathsConfig,

    /// QEMU configuration
    pub qemu: QemuConfig,

    /// Guest account and reachability probing
    pub ssh: SshConfig,

    /// ansible-playbook invocation
    pub ansible: AnsibleConfig,
}

/// Where the harness reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Per-test working directories are created under here
    pub workdir_root: PathBuf,

    /// Shared Ansible roles directory
    pub roles_dir: PathBuf,

    /// Downloaded disk images
    pub asset_cache_dir: PathBuf,

    /// Suite results
    pub results_dir: PathBuf,

    /// Keep working directories after teardown for inspection
    pub keep_workdirs: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workdir_root: std::env::temp_dir().join("sysapi-test"),
            roles_dir: PathBuf::from("roles"),
            asset_cache_dir: default_cache_dir(),
            results_dir: PathBuf::from("test-results"),
            keep_workdirs: true,
        }
    }
}

/// QEMU-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QemuConfig {
    /// Path to the qemu-system binary
    pub binary_path: String,

    /// Guest memory in MiB
    pub memory_mb: u32,

    /// Host port forwarded to the guest's ssh port
    pub host_forward_port: u16,

    /// Guest ssh port
    pub guest_ssh_port: u16,

    /// KVM device; acceleration is used only when it is writable
    pub kvm_device: PathBuf,

    /// File in the workdir receiving the hypervisor's output
    pub log_file: String,
}

impl Default for QemuConfig {
    fn default() -> Self {
        Self {
            binary_path: "qemu-system-x86_64".to_string(),
            memory_mb: 1024,
            host_forward_port: 2222,
            guest_ssh_port: 22,
            kvm_device: PathBuf::from("/dev/kvm"),
            log_file: "qemu.log".to_string(),
        }
    }
}

/// Guest account seeded at first boot and how to probe it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub user: String,
    pub password: String,

    /// Reachability probe attempts before giving up
    pub connect_attempts: u32,

    /// Delay between probe attempts
    pub connect_interval_ms: u64,

    /// Timeout of a single probe
    pub probe_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: "admin".to_string(),
            password: "foobar".to_string(),
            connect_attempts: 10,
            connect_interval_ms: 3000,
            probe_timeout_secs: 60,
        }
    }
}

impl SshConfig {
    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// ansible-playbook invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnsibleConfig {
    pub playbook_binary: String,

    /// Verbosity flag passed before the inventory, empty for none
    pub verbosity: String,

    pub timeout_secs: u64,

    /// Inventory host name targeted by every play
    pub logical_host: String,
}

impl Default for AnsibleConfig {
    fn default() -> Self {
        Self {
            playbook_binary: "ansible-playbook".to_string(),
            verbosity: "-vvv".to_string(),
            timeout_secs: 1800,
            logical_host: LOGICAL_HOST.to_string(),
        }
    }
}

impl AnsibleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join("sysapi-test")
        .join("assets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_guest_image_conventions() {
        let config = HarnessConfig::default();
        assert_eq!(config.qemu.memory_mb, 1024);
        assert_eq!(config.qemu.host_forward_port, 2222);
        assert_eq!(config.ssh.user, "admin");
        assert_eq!(config.ssh.connect_attempts, 10);
        assert_eq!(config.ssh.connect_interval(), Duration::from_secs(3));
        assert_eq!(config.ansible.logical_host, "system-api-test");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: HarnessConfig = toml::from_str(
            r#"
[qemu]
memory_mb = 2048

[ssh]
connect_attempts = 3
"#,
        )
        .unwrap();
        assert_eq!(config.qemu.memory_mb, 2048);
        assert_eq!(config.qemu.binary_path, "qemu-system-x86_64");
        assert_eq!(config.ssh.connect_attempts, 3);
        assert_eq!(config.ssh.user, "admin");
    }

    #[test]
    fn test_saved_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc").join("sysapi-test.toml");

        let mut config = HarnessConfig::default();
        config.paths.keep_workdirs = false;
        config.qemu.memory_mb = 4096;
        config.ssh.connect_interval_ms = 500;
        config.ansible.verbosity = String::new();
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert!(!loaded.paths.keep_workdirs);
        assert_eq!(loaded.paths.workdir_root, config.paths.workdir_root);
        assert_eq!(loaded.qemu.memory_mb, 4096);
        assert_eq!(loaded.ssh.connect_interval(), Duration::from_millis(500));
        assert_eq!(loaded.ansible.verbosity, "");
        assert_eq!(loaded.ansible.logical_host, "system-api-test");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = HarnessConfig::load(Path::new("/nonexistent/sysapi.toml")).unwrap();
        assert_eq!(config.ansible.playbook_binary, "ansible-playbook");
    }
}
