//! Systems under test
//!
//! A [`Target`] is either the local host or a throwaway virtual machine. Both
//! run commands and describe themselves to Ansible through an inventory file
//! in their working directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::inventory;
use crate::vm::VirtualTarget;
use sysapi_common::{
    CommandLine, CommandRunner, ConnectionDescriptor, Result, RunOptions, TargetKind,
    DEFAULT_TIMEOUT,
};

/// Directories and files owned by a single target
#[derive(Debug, Clone)]
pub struct Workspace {
    workdir: PathBuf,
    roles_dir: PathBuf,
    logical_host: String,
    inventory_file: Option<PathBuf>,
}

impl Workspace {
    pub fn new(
        workdir: impl Into<PathBuf>,
        roles_dir: impl Into<PathBuf>,
        logical_host: impl Into<String>,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            roles_dir: roles_dir.into(),
            logical_host: logical_host.into(),
            inventory_file: None,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn roles_dir(&self) -> &Path {
        &self.roles_dir
    }

    pub fn logical_host(&self) -> &str {
        &self.logical_host
    }

    /// Inventory written by the last [`create_inventory_file`](Self::create_inventory_file)
    pub fn inventory_file(&self) -> Option<&Path> {
        self.inventory_file.as_deref()
    }

    /// Write the inventory describing how to reach this target
    pub fn create_inventory_file(&mut self, descriptor: &ConnectionDescriptor) -> Result<&Path> {
        let path = inventory::write(&self.workdir, &self.logical_host, descriptor)?;
        Ok(self.inventory_file.insert(path).as_path())
    }
}

/// The controlling host itself
pub struct LocalTarget {
    workspace: Workspace,
    runner: Arc<dyn CommandRunner>,
}

impl LocalTarget {
    /// Create a local target and write its inventory
    pub fn new(mut workspace: Workspace, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        workspace.create_inventory_file(&ConnectionDescriptor::Local)?;
        Ok(Self { workspace, runner })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn create_inventory_file(&mut self, descriptor: &ConnectionDescriptor) -> Result<&Path> {
        self.workspace.create_inventory_file(descriptor)
    }

    /// Run `command` on this host
    pub async fn execute(
        &self,
        command: impl Into<CommandLine>,
        timeout: Option<Duration>,
        log_on_error: bool,
    ) -> Result<String> {
        let options = RunOptions::default()
            .with_timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .log_on_error(log_on_error);
        self.runner.run(&command.into(), &options).await
    }
}

/// A system under test
pub enum Target {
    Local(LocalTarget),
    Virtual(VirtualTarget),
}

impl Target {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Local(_) => TargetKind::Local,
            Target::Virtual(_) => TargetKind::Virtual,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        match self {
            Target::Local(local) => local.workspace(),
            Target::Virtual(vm) => vm.workspace(),
        }
    }

    /// Run `command` on the target and return its stdout
    pub async fn execute(
        &self,
        command: impl Into<CommandLine>,
        timeout: Option<Duration>,
        log_on_error: bool,
    ) -> Result<String> {
        match self {
            Target::Local(local) => local.execute(command, timeout, log_on_error).await,
            Target::Virtual(vm) => vm.execute(command, timeout, log_on_error).await,
        }
    }

    pub fn create_inventory_file(&mut self, descriptor: &ConnectionDescriptor) -> Result<&Path> {
        match self {
            Target::Local(local) => local.create_inventory_file(descriptor),
            Target::Virtual(vm) => vm.create_inventory_file(descriptor),
        }
    }

    /// Release the target; only virtual targets hold anything to release
    pub fn teardown(&mut self) -> Result<()> {
        match self {
            Target::Local(_) => Ok(()),
            Target::Virtual(vm) => vm.teardown(),
        }
    }
}
