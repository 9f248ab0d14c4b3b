//! # toolrack-foundation
//!
//! Foundation layer for ToolRack:
//! - Error: 중앙 에러 타입과 `Result` 별칭
//! - Config: 플러그인 시스템 설정 (JSON 파일 + 환경 변수)
//! - Permission: 권한 매트릭스, 플러그인별 오버라이드, 정적 위험 스캔
//! - Storage: JsonStore (설정 파일)
//!
//! ## 아키텍처
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  toolrack-core (plugin host)                  │
//! │   discovery → security → lifecycle registry   │
//! │                     │                         │
//! │                     ▼                         │
//! │  toolrack-foundation                          │
//! │   PermissionMatrix + PermissionOverrides      │
//! │   PluginSystemConfig / EnvSource / JsonStore  │
//! └──────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod permission;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{expand_home, is_truthy, EnvSource, MapEnv, PluginSystemConfig, ProcessEnv};

// ============================================================================
// Permission (권한 시스템)
// ============================================================================
pub use permission::{
    normalize_plugin_name, scan_source, Permission, PermissionMatrix, PermissionOverrides,
    PermissionSet, PluginConfigSource,
};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::JsonStore;
