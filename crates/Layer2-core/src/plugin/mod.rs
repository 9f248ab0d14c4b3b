//! # Plugin System
//!
//! 재시작 없이 외부 작성 플러그인으로 호스트 기능을 확장합니다.
//!
//! ## 아키텍처
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     LifecycleRegistry                        │
//! │   slots: name → (status, Plugin, descriptor, ticket)         │
//! │        │                │                     │              │
//! │        ▼                ▼                     ▼              │
//! │  PluginDiscovery   PluginSecurity     CapabilityRegistry     │
//! │   UnitLoader[]      allow-list          PluginTool           │
//! │   ├ NativeLoader    PermissionMatrix                         │
//! │   └ ProcessLoader   SandboxDescriptor                        │
//! │                          │                                   │
//! │                       EventBus (LifecycleEvent)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 플러그인 형태
//!
//! 1. **Native**: 호스트에 컴파일된 모듈, 디스크의 `<name>.toml` 유닛 파일로 활성화
//! 2. **Process**: `sh`/`py`/`js` 스크립트, stdio 위 JSON-RPC 2.0
//!
//! ## 예시
//!
//! ```ignore
//! let native = NativeLoader::new().with_module("file_tree", vec![
//!     UnitExport::plugin("FileTree", || Arc::new(FileTree::default())),
//! ]);
//! let registry = LifecycleRegistry::from_config(
//!     &PluginSystemConfig::load()?,
//!     vec![Arc::new(native), Arc::new(ProcessLoader::new())],
//!     Arc::new(InMemoryCapabilityRegistry::new()),
//!     Arc::new(ProcessEnv),
//! );
//!
//! let summary = registry.initialize_plugins().await?;
//! registry.reload("file_tree").await?;
//! registry.shutdown_all().await;
//! ```

mod discovery;
mod events;
mod host;
mod lifecycle;
mod loader;
mod metadata;
mod security;
mod traits;

pub use discovery::{DiscoveryFailure, DiscoveryReport, PluginDescriptor, PluginDiscovery, PluginKind};
pub use events::{EventBus, LifecycleEvent, LifecycleEventKind};
pub use host::{Capability, CapabilityRegistry, InMemoryCapabilityRegistry, PluginTool};
pub use lifecycle::{
    InitializationSummary, LifecycleRegistry, Plugin, PluginFailure, PluginStatusReport,
    ShutdownReport, UnloadReport,
};
pub use loader::{
    ContractOp, DeclaredMetadata, LoadableUnit, NativeLoader, ProcessLoader, ProcessUnit,
    UnitExport, UnitFactory, UnitLoader, NATIVE_EXTENSION,
};
pub use metadata::{
    dependency_name, strip_json_comments, MetadataFile, PluginMetadata, PluginStatus,
    DEFAULT_PROTOCOL_VERSION, DEFAULT_RUNTIME_VERSION, DEFAULT_VERSION,
};
pub use security::{PluginSecurity, RiskLevel, SandboxDescriptor, SecurityRejection, SecurityReport};
pub use traits::{PluginContext, PluginUnit};
