//! Tenant (instance) handling: discovery on disk, configuration records, and
//! deterministic system-prompt assembly from layered fragments.

mod builder;
mod config;
mod files;
mod registry;

pub use builder::{FragmentSource, PromptBuilder};
pub use config::{
    ContextSettings, InstanceFilesSettings, MemorySettings, TenantConfig, ToolSettings,
    WebNavigationSettings,
};
pub use files::{load_instance_files, InstanceFile};
pub use registry::{InstanceError, InstanceRegistry, Tenant, TenantSummary};
