//! Permission system for ToolRack plugins
//!
//! - `types`: 권한 플래그, 기본 매트릭스, 플러그인별 권한 집합
//! - `overrides`: 플러그인별 오버라이드 (환경 변수 + 런타임 grant/revoke), 설정 소스
//! - `security`: 소스 정적 위험 스캔
//!
//! ## 사용 예시
//!
//! ```rust,ignore
//! use toolrack_foundation::permission::{Permission, PermissionMatrix, PermissionOverrides};
//! use toolrack_foundation::config::ProcessEnv;
//!
//! let overrides = PermissionOverrides::from_env(&ProcessEnv, "PLUGIN_SECURITY");
//! let set = PermissionMatrix::conservative().resolve(&overrides, "alpha");
//! if set.allows(Permission::NetworkAccess) {
//!     // ...
//! }
//! ```

mod overrides;
pub mod security;
mod types;

pub use overrides::{normalize_plugin_name, PermissionOverrides, PluginConfigSource};
pub use security::{risk_patterns, scan_source, RiskKind, RiskPattern};
pub use types::{Permission, PermissionMatrix, PermissionSet};
