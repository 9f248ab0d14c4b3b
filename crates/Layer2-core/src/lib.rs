//! toolrack-core: Plugin host for ToolRack
//!
//! Layer2 - 플러그인 발견, 보안 게이트, 라이프사이클 레지스트리
//!
//! # 주요 모듈
//!
//! - `plugin`: 발견 (`PluginDiscovery`), 보안 (`PluginSecurity`),
//!   라이프사이클 (`LifecycleRegistry`), 호스트 레지스트리 연동 (`CapabilityRegistry`)
//!
//! # 사용 예시
//!
//! ```ignore
//! use toolrack_core::{LifecycleRegistry, InMemoryCapabilityRegistry, ProcessLoader};
//!
//! let host = Arc::new(InMemoryCapabilityRegistry::new());
//! let registry = LifecycleRegistry::from_config(&config, loaders, host.clone(), env);
//!
//! let plugin = registry.load_from_path("~/.toolrack/plugins/file_tree.toml").await?;
//! let tool = host.lookup(plugin.name()).unwrap();
//! let output = tool.call(json!({ "path": "." })).await?;
//! ```

pub mod plugin;

// Re-exports: Foundation
pub use toolrack_foundation::{
    Error, Permission, PermissionMatrix, PermissionOverrides, PermissionSet, PluginSystemConfig,
    Result,
};

// Re-exports: Plugin
pub use plugin::{
    Capability, CapabilityRegistry, DiscoveryReport, InMemoryCapabilityRegistry,
    InitializationSummary, LifecycleEvent, LifecycleEventKind, LifecycleRegistry, NativeLoader,
    Plugin, PluginContext, PluginDescriptor, PluginDiscovery, PluginMetadata, PluginSecurity,
    PluginStatus, PluginTool, PluginUnit, ProcessLoader, SandboxDescriptor, SecurityReport,
    ShutdownReport, UnitExport, UnitLoader, UnloadReport,
};
