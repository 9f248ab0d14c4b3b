//! Host capability registry - 호스트 기능 레지스트리 연동
//!
//! 라이프사이클 레지스트리는 플러그인이 ACTIVE 가 될 때 `PluginTool` 어댑터를
//! 등록하고, 언로드 시 제거합니다. 등록/해제는 상태 전환과 같은 락 안에서
//! 수행되므로 이 트레이트는 동기 메서드만 가집니다.

use super::traits::PluginUnit;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use toolrack_foundation::{Error, Result};
use tracing::{debug, warn};

// ============================================================================
// Capability - 호스트에 노출되는 기능
// ============================================================================

/// 호스트에 등록 가능한 기능 핸들
#[async_trait]
pub trait Capability: Send + Sync {
    /// 고유 이름
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// 입력 스키마
    fn schema(&self) -> Value;

    /// 실행
    async fn call(&self, params: Value) -> Result<Value>;
}

// ============================================================================
// CapabilityRegistry - 호스트 레지스트리 인터페이스
// ============================================================================

/// 호스트 기능 레지스트리
pub trait CapabilityRegistry: Send + Sync {
    /// 등록 (중복 이름은 실패)
    fn register(&self, name: &str, capability: Arc<dyn Capability>) -> Result<()>;

    /// 제거 (없으면 false)
    fn unregister(&self, name: &str) -> bool;

    /// 조회
    fn lookup(&self, name: &str) -> Option<Arc<dyn Capability>>;

    /// 등록된 이름 목록
    fn names(&self) -> Vec<String>;
}

/// 메모리 기반 기능 레지스트리
#[derive(Default)]
pub struct InMemoryCapabilityRegistry {
    entries: RwLock<HashMap<String, Arc<dyn Capability>>>,
}

impl InMemoryCapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CapabilityRegistry for InMemoryCapabilityRegistry {
    fn register(&self, name: &str, capability: Arc<dyn Capability>) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            warn!("Capability {} is already registered", name);
            return Err(Error::RegistryConflict(format!(
                "capability {} is already registered",
                name
            )));
        }
        entries.insert(name.to_string(), capability);
        debug!("Registered capability: {}", name);
        Ok(())
    }

    fn unregister(&self, name: &str) -> bool {
        let removed = self.entries.write().remove(name).is_some();
        if removed {
            debug!("Unregistered capability: {}", name);
        }
        removed
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.read().get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

// ============================================================================
// PluginTool - 플러그인 유닛 어댑터
// ============================================================================

/// 플러그인 유닛을 호스트 기능으로 감싸는 어댑터
///
/// 스키마의 `required` 필드를 검사한 뒤 실행하고, 실행 에러는 플러그인 이름과
/// 함께 감쌉니다.
pub struct PluginTool {
    name: String,
    description: String,
    schema: Value,
    unit: Arc<dyn PluginUnit>,
}

impl PluginTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: Arc<dyn PluginUnit>,
    ) -> Self {
        let schema = unit.schema();
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            unit,
        }
    }

    /// 필수 파라미터 검사
    fn validate_params(&self, params: &Value) -> Result<()> {
        let Some(required) = self.schema.get("required").and_then(Value::as_array) else {
            return Ok(());
        };

        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|key| params.get(*key).map_or(true, Value::is_null))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "Missing required parameters for {}: {}",
                self.name,
                missing.join(", ")
            )))
        }
    }
}

#[async_trait]
impl Capability for PluginTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> Value {
        self.schema.clone()
    }

    async fn call(&self, params: Value) -> Result<Value> {
        self.validate_params(&params)?;
        self.unit.execute(params).await.map_err(|e| {
            warn!("Plugin {} execution failed: {}", self.name, e);
            Error::Plugin(format!("{} execution failed: {}", self.name, e))
        })
    }
}
