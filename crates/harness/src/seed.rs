//! First-boot seed for throwaway machines
//!
//! A fresh ssh identity is generated per machine and handed to cloud-init
//! through a small `cidata` ISO next to the base disk image.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::SshConfig;
use sysapi_common::{CommandLine, CommandRunner, Result, RunOptions, LOGICAL_HOST};

/// Generated ssh identity for one machine
#[derive(Debug, Clone)]
pub struct Identity {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

impl Identity {
    /// Create an unencrypted keypair at `<workdir>/id_rsa`
    pub async fn generate(runner: &dyn CommandRunner, workdir: &Path) -> Result<Self> {
        let private_key = workdir.join("id_rsa");
        let command = CommandLine::argv([
            "ssh-keygen".to_string(),
            "-q".to_string(),
            "-f".to_string(),
            private_key.display().to_string(),
            "-N".to_string(),
            String::new(),
        ]);
        runner.run(&command, &RunOptions::default()).await?;

        let mut public_key = private_key.clone().into_os_string();
        public_key.push(".pub");
        Ok(Self {
            private_key,
            public_key: PathBuf::from(public_key),
        })
    }

    pub fn read_public_key(&self) -> Result<String> {
        Ok(std::fs::read_to_string(&self.public_key)?.trim().to_string())
    }
}

#[derive(Debug, Serialize)]
struct MetaData<'a> {
    #[serde(rename = "instance-id")]
    instance_id: &'a str,
    #[serde(rename = "local-hostname")]
    local_hostname: &'a str,
}

#[derive(Debug, Serialize)]
struct UserData<'a> {
    user: &'a str,
    password: &'a str,
    ssh_pwauth: bool,
    chpasswd: Chpasswd,
    ssh_authorized_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Chpasswd {
    expire: bool,
}

/// Render the cloud-init `meta-data` document
pub fn render_meta_data() -> Result<String> {
    Ok(serde_yaml::to_string(&MetaData {
        instance_id: "nocloud",
        local_hostname: LOGICAL_HOST,
    })?)
}

/// Render the cloud-init `user-data` document
pub fn render_user_data(ssh: &SshConfig, public_key: &str) -> Result<String> {
    let body = serde_yaml::to_string(&UserData {
        user: &ssh.user,
        password: &ssh.password,
        ssh_pwauth: true,
        chpasswd: Chpasswd { expire: false },
        ssh_authorized_keys: vec![public_key.to_string()],
    })?;
    Ok(format!("#cloud-config\n{}", body))
}

/// Write the seed documents and pack them into `<workdir>/cloud-init.iso`
pub async fn build_seed_image(
    runner: &dyn CommandRunner,
    workdir: &Path,
    ssh: &SshConfig,
    identity: &Identity,
) -> Result<PathBuf> {
    let meta_data = workdir.join("meta-data");
    let user_data = workdir.join("user-data");
    std::fs::write(&meta_data, render_meta_data()?)?;
    std::fs::write(&user_data, render_user_data(ssh, &identity.read_public_key()?)?)?;

    let iso = workdir.join("cloud-init.iso");
    let command = CommandLine::argv([
        "genisoimage".to_string(),
        "-input-charset".to_string(),
        "utf-8".to_string(),
        "-output".to_string(),
        iso.display().to_string(),
        "-volid".to_string(),
        "cidata".to_string(),
        "-joliet".to_string(),
        "-rock".to_string(),
        "-quiet".to_string(),
        user_data.display().to_string(),
        meta_data.display().to_string(),
    ]);
    runner.run(&command, &RunOptions::default()).await?;

    debug!("Seed image written to {}", iso.display());
    Ok(iso)
}
