//! Error types for ToolRack
//!
//! 플러그인 시스템의 모든 에러를 중앙에서 관리

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// ToolRack 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 발견(discovery) 관련
    // ========================================================================
    #[error("Invalid plugin metadata in {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    #[error("No plugin entry point found in {0}")]
    MissingEntryPoint(PathBuf),

    #[error("Ambiguous entry point in {path}: {candidates:?}")]
    AmbiguousEntryPoint {
        path: PathBuf,
        candidates: Vec<String>,
    },

    #[error("Unsupported plugin unit: {0}")]
    UnsupportedUnit(PathBuf),

    #[error("Plugin directory unreadable: {path}: {message}")]
    DirectoryUnreadable { path: PathBuf, message: String },

    // ========================================================================
    // 보안 관련
    // ========================================================================
    #[error("Security rejection for {path}: {reason}")]
    SecurityRejected { path: PathBuf, reason: String },

    // ========================================================================
    // 라이프사이클 관련
    // ========================================================================
    #[error("Plugin {0} is already loaded")]
    AlreadyLoaded(String),

    #[error("Plugin {name} is busy ({status})")]
    Busy { name: String, status: String },

    #[error("Plugin {0} not found")]
    NotFound(String),

    #[error("Plugin {name} failed to initialize: {message}")]
    Initialization { name: String, message: String },

    #[error("Invalid status transition for {name}: {from} -> {to}")]
    InvalidTransition {
        name: String,
        from: String,
        to: String,
    },

    #[error("Plugin {name} is missing dependencies: {missing:?}")]
    MissingDependencies { name: String, missing: Vec<String> },

    #[error("Capability registry conflict: {0}")]
    RegistryConflict(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Busy { .. } | Error::Transport(_)
        )
    }

    /// 후보 하나에만 국한된 발견 에러인지 (스캔은 계속 진행)
    pub fn is_discovery_local(&self) -> bool {
        matches!(
            self,
            Error::Metadata { .. }
                | Error::MissingEntryPoint(_)
                | Error::AmbiguousEntryPoint { .. }
                | Error::UnsupportedUnit(_)
                | Error::Toml(_)
                | Error::Json(_)
        )
    }

    /// 메타데이터 에러 생성 헬퍼
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// 보안 거부 에러 생성 헬퍼
    pub fn security(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::SecurityRejected {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// 초기화 실패 에러 생성 헬퍼
    pub fn initialization(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Initialization {
            name: name.into(),
            message: message.into(),
        }
    }
}
