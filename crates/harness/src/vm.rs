//! Throwaway virtual machine targets
//!
//! Lifecycle: `Created → BootRequested → WaitingForReachability → Ready →
//! Terminated`, or `FailedToStart` when boot does not complete. The QEMU
//! process belongs to the [`VirtualTarget`] that started it and is stopped on
//! every path out of it, including a failed boot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::qemu::{HypervisorProcess, QemuLauncher};
use crate::seed::{self, Identity};
use crate::target::Workspace;
use sysapi_common::{
    CommandLine, CommandRunner, ConnectionDescriptor, Error, Result, RunOptions, SshConnection,
    VmState, DEFAULT_TIMEOUT,
};

/// Command used to probe whether the guest accepts ssh commands
const PROBE_COMMAND: &str = "/bin/true";

/// A disposable QEMU machine reached over ssh
pub struct VirtualTarget {
    image: PathBuf,
    workspace: Workspace,
    config: HarnessConfig,
    runner: Arc<dyn CommandRunner>,
    hypervisor: Option<HypervisorProcess>,
    state: VmState,
}

impl VirtualTarget {
    /// Create a machine for `image`; nothing runs until [`start`](Self::start)
    pub fn new(
        image: impl Into<PathBuf>,
        workspace: Workspace,
        config: HarnessConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            image: image.into(),
            workspace,
            config,
            runner,
            hypervisor: None,
            state: VmState::Created,
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    /// PID of the running hypervisor
    pub fn hypervisor_pid(&self) -> Option<u32> {
        self.hypervisor.as_ref().map(HypervisorProcess::pid)
    }

    /// Private key of the machine's generated identity
    pub fn identity_file(&self) -> PathBuf {
        self.workspace.workdir().join("id_rsa")
    }

    /// How ssh and Ansible reach this machine
    pub fn connection(&self) -> SshConnection {
        SshConnection {
            host: self.config.ssh.host.clone(),
            port: self.config.qemu.host_forward_port,
            user: self.config.ssh.user.clone(),
            private_key_file: self.identity_file(),
            extra_args: SshConnection::disposable_host_options(),
        }
    }

    /// Boot the machine and wait until it accepts ssh commands.
    ///
    /// On failure the hypervisor is already stopped and the state is
    /// [`VmState::FailedToStart`].
    pub async fn start(&mut self) -> Result<()> {
        if self.state != VmState::Created {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: VmState::BootRequested.to_string(),
            });
        }

        info!("Starting virtual machine from {}", self.image.display());
        match self.boot().await {
            Ok(()) => {
                self.state = VmState::Ready;
                info!("Virtual machine is ready");
                Ok(())
            }
            Err(e) => {
                if let Some(mut hypervisor) = self.hypervisor.take() {
                    if let Err(stop_err) = hypervisor.terminate() {
                        warn!("Failed to stop QEMU after boot failure: {}", stop_err);
                    }
                }
                self.state = VmState::FailedToStart;
                Err(e)
            }
        }
    }

    async fn boot(&mut self) -> Result<()> {
        self.state = VmState::BootRequested;
        let workdir = self.workspace.workdir().to_path_buf();

        let identity = Identity::generate(self.runner.as_ref(), &workdir).await?;
        let seed_iso =
            seed::build_seed_image(self.runner.as_ref(), &workdir, &self.config.ssh, &identity)
                .await?;

        let launcher = QemuLauncher::new(self.config.qemu.clone());
        let log_path = workdir.join(&self.config.qemu.log_file);
        self.hypervisor = Some(launcher.spawn(&self.image, &seed_iso, &log_path)?);
        self.state = VmState::WaitingForReachability;

        self.wait_for_reachability().await?;

        let descriptor = ConnectionDescriptor::Ssh(self.connection());
        self.workspace.create_inventory_file(&descriptor)?;
        Ok(())
    }

    /// Probe the guest until a command succeeds or attempts run out.
    ///
    /// Only the final attempt reports its failure. A hypervisor that has
    /// already exited ends the wait with the attempts made so far.
    async fn wait_for_reachability(&mut self) -> Result<()> {
        let attempts = self.config.ssh.connect_attempts.max(1);
        let interval = self.config.ssh.connect_interval();
        let probe_timeout = self.config.ssh.probe_timeout();

        for attempt in 1..=attempts {
            let last = attempt == attempts;
            match self.remote(PROBE_COMMAND.into(), probe_timeout, last).await {
                Ok(_) => {
                    debug!("Machine reachable after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(e) if e.is_command_failure() => {
                    debug!("Reachability attempt {}/{} failed: {}", attempt, attempts, e);
                }
                Err(e) => return Err(e),
            }

            if let Some(hypervisor) = self.hypervisor.as_mut() {
                if !hypervisor.is_running() {
                    warn!(
                        "QEMU exited during boot, see {}",
                        self.workspace
                            .workdir()
                            .join(&self.config.qemu.log_file)
                            .display()
                    );
                    return Err(Error::Provisioning { attempts: attempt });
                }
            }

            if !last {
                tokio::time::sleep(interval).await;
            }
        }

        Err(Error::Provisioning { attempts })
    }

    /// Wrap `command` in an ssh invocation against this machine
    pub fn ssh_command(&self, command: &CommandLine) -> CommandLine {
        let connection = self.connection();
        let mut args = vec![
            "ssh".to_string(),
            "-o".to_string(),
            format!("IdentityFile={}", connection.private_key_file.display()),
        ];
        args.extend(connection.extra_args.iter().cloned());
        args.extend([
            "-o".to_string(),
            "PasswordAuthentication=no".to_string(),
            connection.destination(),
            "-p".to_string(),
            connection.port.to_string(),
            command.to_shell(),
        ]);
        CommandLine::Argv(args)
    }

    async fn remote(
        &self,
        command: CommandLine,
        timeout: Duration,
        log_on_error: bool,
    ) -> Result<String> {
        let options = RunOptions::default()
            .with_timeout(timeout)
            .log_on_error(log_on_error);
        self.runner.run(&self.ssh_command(&command), &options).await
    }

    /// Run `command` on the guest and return its stdout
    pub async fn execute(
        &self,
        command: impl Into<CommandLine>,
        timeout: Option<Duration>,
        log_on_error: bool,
    ) -> Result<String> {
        if self.state != VmState::Ready {
            return Err(Error::Hypervisor(format!(
                "machine is not ready (state: {})",
                self.state
            )));
        }
        self.remote(
            command.into(),
            timeout.unwrap_or(DEFAULT_TIMEOUT),
            log_on_error,
        )
        .await
    }

    pub fn create_inventory_file(&mut self, descriptor: &ConnectionDescriptor) -> Result<&Path> {
        self.workspace.create_inventory_file(descriptor)
    }

    /// Stop the hypervisor and wait for it to exit. Repeated calls are no-ops.
    pub fn teardown(&mut self) -> Result<()> {
        if let Some(mut hypervisor) = self.hypervisor.take() {
            hypervisor.terminate()?;
        }
        if self.state != VmState::FailedToStart {
            self.state = VmState::Terminated;
        }
        Ok(())
    }
}
