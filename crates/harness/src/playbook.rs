//! Run descriptors and the ansible-playbook invocation
//!
//! Every configuration call renders a fresh single-play playbook into the
//! target's working directory and runs it against the target's inventory.

use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::AnsibleConfig;
use crate::target::Target;
use sysapi_common::{
    CommandLine, CommandRunner, Error, Params, Result, RoleInvocation, RunOptions,
};

/// File name of the rendered playbook inside a target's working directory
pub const PLAYBOOK_FILE: &str = "test.yml";

/// One play of a run descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Play {
    pub hosts: String,
    #[serde(rename = "become")]
    pub escalate: bool,
    pub roles: Vec<RoleEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_tasks: Option<Vec<PostTask>>,
}

/// A role applied by a play, with its parameters inline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleEntry {
    pub role: String,
    #[serde(flatten)]
    pub params: Params,
}

/// Task file run after the roles, with the role parameters as variables
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostTask {
    pub include: String,
    pub vars: Params,
}

/// A playbook holding exactly one play
#[derive(Debug, Clone, PartialEq)]
pub struct RunDescriptor {
    play: Play,
}

impl Serialize for RunDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.plays().serialize(serializer)
    }
}

impl RunDescriptor {
    /// Build the descriptor applying `invocation` to `host`
    pub fn for_role(invocation: &RoleInvocation, host: &str, roles_dir: &Path) -> Self {
        let role = invocation.role_dir_name();

        let post_tasks = invocation.test_tasks_file.as_ref().map(|file| {
            let include = roles_dir.join(&role).join("test").join(file);
            vec![PostTask {
                include: include.display().to_string(),
                vars: invocation.params.clone(),
            }]
        });

        Self {
            play: Play {
                hosts: host.to_string(),
                escalate: true,
                roles: vec![RoleEntry {
                    role,
                    params: invocation.params.clone(),
                }],
                post_tasks,
            },
        }
    }

    pub fn plays(&self) -> &[Play] {
        std::slice::from_ref(&self.play)
    }

    pub fn play(&self) -> &Play {
        &self.play
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the descriptor to `<workdir>/test.yml`
    pub fn write(&self, workdir: &Path) -> Result<PathBuf> {
        let path = workdir.join(PLAYBOOK_FILE);
        std::fs::write(&path, self.to_yaml()?)?;
        Ok(path)
    }
}

/// Applies roles to targets through ansible-playbook
pub struct ConfigurationApplier {
    runner: Arc<dyn CommandRunner>,
    config: AnsibleConfig,
}

impl ConfigurationApplier {
    pub fn new(runner: Arc<dyn CommandRunner>, config: AnsibleConfig) -> Self {
        Self { runner, config }
    }

    /// Apply `invocation` to `target` and return ansible-playbook's output.
    ///
    /// A failed run surfaces the playbook's command error unchanged.
    pub async fn apply(&self, target: &Target, invocation: &RoleInvocation) -> Result<String> {
        let workspace = target.workspace();
        let inventory = workspace.inventory_file().ok_or_else(|| {
            Error::InvalidConfig(format!(
                "no inventory written in {}",
                workspace.workdir().display()
            ))
        })?;

        let descriptor =
            RunDescriptor::for_role(invocation, workspace.logical_host(), workspace.roles_dir());
        let playbook = descriptor.write(workspace.workdir())?;

        info!(
            "Applying role {} to {} target",
            invocation.role_name,
            target.kind()
        );

        let mut args = vec![self.config.playbook_binary.clone()];
        if !self.config.verbosity.is_empty() {
            args.push(self.config.verbosity.clone());
        }
        args.extend([
            "-i".to_string(),
            inventory.display().to_string(),
            playbook.display().to_string(),
        ]);

        let options = RunOptions::default()
            .with_timeout(self.config.timeout())
            .with_env(
                "ANSIBLE_ROLES_PATH",
                workspace.roles_dir().display().to_string(),
            );
        self.runner.run(&CommandLine::Argv(args), &options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{LocalTarget, Workspace};
    use sysapi_common::testing::RecordingRunner;

    fn tuned(profile: &str) -> RoleInvocation {
        RoleInvocation::new("com.redhat.tuned").with_param("profile", profile)
    }

    #[test]
    fn test_descriptor_without_test_tasks() {
        let descriptor =
            RunDescriptor::for_role(&tuned("balanced"), "system-api-test", Path::new("/roles"));

        assert_eq!(descriptor.plays().len(), 1);
        assert_eq!(
            descriptor.to_yaml().unwrap(),
            "- hosts: system-api-test\n  become: true\n  roles:\n  - role: com_redhat_tuned\n    profile: balanced\n"
        );
        assert!(descriptor.play().post_tasks.is_none());
    }

    #[test]
    fn test_descriptor_with_test_tasks() {
        let invocation = tuned("throughput-performance").with_test_tasks_file("main.yml");
        let descriptor =
            RunDescriptor::for_role(&invocation, "system-api-test", Path::new("/roles"));

        let doc: serde_yaml::Value = serde_yaml::from_str(&descriptor.to_yaml().unwrap()).unwrap();
        let post_tasks = doc[0]["post_tasks"].as_sequence().unwrap();
        assert_eq!(post_tasks.len(), 1);
        assert_eq!(
            post_tasks[0]["include"],
            "/roles/com_redhat_tuned/test/main.yml"
        );
        assert_eq!(post_tasks[0]["vars"]["profile"], "throughput-performance");
        assert_eq!(doc[0]["roles"][0]["profile"], "throughput-performance");
    }

    #[test]
    fn test_boolean_params_stay_boolean() {
        let invocation =
            RoleInvocation::new("com.redhat.tuned").with_param("use_recommended_profile", true);
        let descriptor = RunDescriptor::for_role(&invocation, "h", Path::new("/roles"));
        let doc: serde_yaml::Value = serde_yaml::from_str(&descriptor.to_yaml().unwrap()).unwrap();
        assert_eq!(doc[0]["roles"][0]["use_recommended_profile"], true);
    }

    #[tokio::test]
    async fn test_apply_runs_playbook_against_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let roles = dir.path().join("roles");
        let runner = RecordingRunner::succeeding();
        let target = Target::Local(
            LocalTarget::new(
                Workspace::new(dir.path(), &roles, "system-api-test"),
                Arc::new(runner.clone()),
            )
            .unwrap(),
        );

        let applier = ConfigurationApplier::new(Arc::new(runner.clone()), AnsibleConfig::default());
        applier.apply(&target, &tuned("balanced")).await.unwrap();

        let calls = runner.calls_to("ansible-playbook");
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].command,
            CommandLine::argv([
                "ansible-playbook".to_string(),
                "-vvv".to_string(),
                "-i".to_string(),
                dir.path().join("inventory").display().to_string(),
                dir.path().join("test.yml").display().to_string(),
            ])
        );
        assert_eq!(
            calls[0].options.env.get("ANSIBLE_ROLES_PATH"),
            Some(&roles.display().to_string())
        );

        let written = std::fs::read_to_string(dir.path().join("test.yml")).unwrap();
        assert!(written.contains("role: com_redhat_tuned"));
        assert!(!written.contains("post_tasks"));
    }

    #[tokio::test]
    async fn test_apply_failure_propagates_command_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::failing(2);
        let target = Target::Local(
            LocalTarget::new(
                Workspace::new(dir.path(), dir.path().join("roles"), "system-api-test"),
                Arc::new(runner.clone()),
            )
            .unwrap(),
        );

        let applier = ConfigurationApplier::new(Arc::new(runner), AnsibleConfig::default());
        match applier.apply(&target, &tuned("powersave")).await {
            Err(Error::Command(err)) => assert_eq!(err.result.exit_code, 2),
            other => panic!("expected command error, got {other:?}"),
        }
    }
}
