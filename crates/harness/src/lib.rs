//! System API test harness
//!
//! Provisions a system under test, applies Ansible roles to it and runs the
//! roles' verification tasks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  SuiteRunner                                                 │
//! │    └── RoleTestCase (YAML) × TargetSpec                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  TestLifecycle                                               │
//! │    ├── set_up(params) -> Target                              │
//! │    │     ├── no source  -> LocalTarget                       │
//! │    │     └── source     -> AssetCache -> VirtualTarget       │
//! │    │                         ├── ssh-keygen, genisoimage     │
//! │    │                         ├── QemuLauncher (snapshot)     │
//! │    │                         └── ssh probe until ready       │
//! │    └── tear_down(target)                                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ConfigurationApplier                                        │
//! │    ├── RunDescriptor -> <workdir>/test.yml                   │
//! │    └── ansible-playbook -i <workdir>/inventory test.yml      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod assets;
pub mod case;
pub mod config;
pub mod inventory;
pub mod lifecycle;
pub mod playbook;
pub mod qemu;
pub mod runner;
pub mod seed;
pub mod target;
pub mod vm;

pub use case::{RoleTestCase, TargetSpec};
pub use config::HarnessConfig;
pub use lifecycle::{TestLifecycle, TestParams};
pub use playbook::{ConfigurationApplier, RunDescriptor};
pub use runner::{SuiteResult, SuiteRunner};
pub use target::{LocalTarget, Target, Workspace};
pub use vm::VirtualTarget;
