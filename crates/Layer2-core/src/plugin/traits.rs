//! Plugin traits - 핵심 플러그인 인터페이스

use super::security::SandboxDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use toolrack_foundation::permission::{Permission, PermissionSet};
use toolrack_foundation::Result;

// ============================================================================
// PluginContext - 플러그인에 제공되는 컨텍스트
// ============================================================================

/// 플러그인 컨텍스트 - `initialize()` 시점에 확정된 설정/권한/샌드박스 스냅샷
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// 플러그인 이름
    name: String,

    /// 플러그인 설정 (환경 변수에서 수집, 키는 소문자)
    configuration: BTreeMap<String, String>,

    /// 샌드박스 (해석된 권한 포함)
    sandbox: SandboxDescriptor,
}

impl PluginContext {
    pub fn new(
        name: impl Into<String>,
        configuration: BTreeMap<String, String>,
        sandbox: SandboxDescriptor,
    ) -> Self {
        Self {
            name: name.into(),
            configuration,
            sandbox,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // 설정
    // ========================================================================

    /// 설정 값 가져오기
    pub fn get_config(&self, key: &str) -> Option<&str> {
        self.configuration
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn configuration(&self) -> &BTreeMap<String, String> {
        &self.configuration
    }

    // ========================================================================
    // 권한 / 샌드박스
    // ========================================================================

    pub fn permissions(&self) -> &PermissionSet {
        &self.sandbox.permissions
    }

    /// 권한 허용 여부
    pub fn allows(&self, permission: Permission) -> bool {
        self.sandbox.permissions.allows(permission)
    }

    pub fn sandbox(&self) -> &SandboxDescriptor {
        &self.sandbox
    }

    /// 전용 작업 디렉토리 (WRITE_FILES 허용 시에만)
    pub fn working_dir(&self) -> Option<&Path> {
        self.sandbox.working_dir()
    }
}

// ============================================================================
// PluginUnit Trait - 모든 플러그인이 구현해야 하는 인터페이스
// ============================================================================

/// 플러그인 유닛 트레이트
///
/// 네 가지 연산을 모두 구현해야 플러그인으로 인정됩니다.
#[async_trait]
pub trait PluginUnit: Send + Sync {
    /// 로드 시 한 번 호출 (타임아웃 적용)
    async fn initialize(&self, ctx: &PluginContext) -> Result<()>;

    /// 언로드 시 한 번 호출 (실패는 보고만 됨)
    async fn cleanup(&self) -> Result<()>;

    /// 기능 실행
    async fn execute(&self, params: Value) -> Result<Value>;

    /// 입력 스키마 (JSON object)
    fn schema(&self) -> Value;
}
