//! Ansible inventory rendering

use std::path::{Path, PathBuf};

use sysapi_common::{ConnectionDescriptor, Result};

/// File name of the inventory inside a target's working directory
pub const INVENTORY_FILE: &str = "inventory";

/// Render the one-line inventory for `host`
pub fn render(host: &str, descriptor: &ConnectionDescriptor) -> String {
    match descriptor {
        ConnectionDescriptor::Local => format!("{} ansible_connection=local", host),
        ConnectionDescriptor::Ssh(ssh) => format!(
            "{} ansible_host={} ansible_port={} ansible_user={} \
             ansible_ssh_private_key_file=\"{}\" ansible_ssh_extra_args=\"{}\"",
            host,
            ssh.host,
            ssh.port,
            ssh.user,
            ssh.private_key_file.display(),
            ssh.extra_args.join(" "),
        ),
    }
}

/// Write the inventory under `workdir` and return its path
pub fn write(workdir: &Path, host: &str, descriptor: &ConnectionDescriptor) -> Result<PathBuf> {
    let path = workdir.join(INVENTORY_FILE);
    std::fs::write(&path, render(host, descriptor))?;
    Ok(path)
}
