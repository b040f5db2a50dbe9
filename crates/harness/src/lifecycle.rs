//! Per-test setup and teardown
//!
//! Picks the kind of target from the test parameters: a `source` image
//! selects a virtual machine, its absence the local host.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assets::AssetCache;
use crate::config::HarnessConfig;
use crate::target::{LocalTarget, Target, Workspace};
use crate::vm::VirtualTarget;
use sysapi_common::{CommandRunner, Result, TargetKind};

/// Parameters selecting and preparing the machine a test runs against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestParams {
    /// Disk image path or URL; selects a virtual machine when set
    #[serde(default)]
    pub source: Option<String>,

    /// Command run once on a freshly booted machine
    #[serde(default)]
    pub setup: Option<String>,
}

/// Creates and releases targets for tests
pub struct TestLifecycle {
    config: HarnessConfig,
    runner: Arc<dyn CommandRunner>,
    assets: AssetCache,
}

impl TestLifecycle {
    pub fn new(config: HarnessConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let assets = AssetCache::new(config.paths.asset_cache_dir.clone());
        Self {
            config,
            runner,
            assets,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Prepare a target for the test `name`.
    ///
    /// A virtual machine whose setup command fails is torn down before the
    /// error is returned. A working directory that never got a target is
    /// removed unless working directories are kept.
    pub async fn set_up(&self, name: &str, params: &TestParams) -> Result<Target> {
        let workdir = self.create_workdir(name)?;
        let workspace = Workspace::new(
            &workdir,
            &self.config.paths.roles_dir,
            &self.config.ansible.logical_host,
        );

        let mut target = match self.provision(name, workspace, params).await {
            Ok(target) => target,
            Err(e) => {
                self.discard_workdir(&workdir);
                return Err(e);
            }
        };

        if let (TargetKind::Virtual, Some(setup)) = (target.kind(), &params.setup) {
            info!("Running setup command for {}", name);
            if let Err(e) = target.execute(setup.as_str(), None, true).await {
                if let Err(teardown_err) = self.tear_down(&mut target) {
                    warn!("Teardown after failed setup also failed: {}", teardown_err);
                }
                return Err(e);
            }
        }

        Ok(target)
    }

    async fn provision(
        &self,
        name: &str,
        workspace: Workspace,
        params: &TestParams,
    ) -> Result<Target> {
        let Some(source) = &params.source else {
            if params.setup.is_some() {
                warn!("Ignoring setup command for local target in {}", name);
            }
            info!("Using local host for {}", name);
            return Ok(Target::Local(LocalTarget::new(
                workspace,
                self.runner.clone(),
            )?));
        };

        let image = self.assets.fetch(source).await?;
        let mut vm = VirtualTarget::new(image, workspace, self.config.clone(), self.runner.clone());
        vm.start().await?;
        Ok(Target::Virtual(vm))
    }

    /// Release `target` and, unless configured to keep it, its working directory
    pub fn tear_down(&self, target: &mut Target) -> Result<()> {
        target.teardown()?;
        if !self.config.paths.keep_workdirs {
            let workdir = target.workspace().workdir();
            if workdir.exists() {
                std::fs::remove_dir_all(workdir)?;
            }
        }
        Ok(())
    }

    fn discard_workdir(&self, workdir: &Path) {
        if self.config.paths.keep_workdirs {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(workdir) {
            warn!("Failed to remove {}: {}", workdir.display(), e);
        }
    }

    fn create_workdir(&self, name: &str) -> Result<PathBuf> {
        let id = Uuid::new_v4().simple().to_string();
        let workdir = self
            .config
            .paths
            .workdir_root
            .join(format!("{}-{}", slug(name), &id[..8]));
        std::fs::create_dir_all(&workdir)?;
        Ok(workdir)
    }
}

fn slug(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
