//! Unit loaders - 엔트리 포인트 파일을 플러그인 타입 목록으로 변환
//!
//! - `native`: 호스트에 컴파일된 모듈을 TOML 유닛 파일로 활성화
//! - `process`: 별도 프로세스에서 JSON-RPC 2.0 (stdio) 으로 동작하는 유닛
//!
//! 로더는 파일을 열어 `UnitExport` 목록을 돌려줄 뿐 인스턴스를 만들지 않습니다.
//! 인스턴스화는 발견 이후 `UnitFactory`를 통해 이루어집니다.

mod native;
mod process;

pub use native::{NativeLoader, NATIVE_EXTENSION};
pub use process::{ProcessLoader, ProcessUnit};

use super::traits::{PluginContext, PluginUnit};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toolrack_foundation::Result;

// ============================================================================
// ContractOp - 플러그인 계약 연산
// ============================================================================

/// 플러그인 계약을 구성하는 연산
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractOp {
    Initialize,
    Cleanup,
    Execute,
    #[serde(alias = "get_schema")]
    Schema,
}

impl ContractOp {
    pub const ALL: [ContractOp; 4] = [
        ContractOp::Initialize,
        ContractOp::Cleanup,
        ContractOp::Execute,
        ContractOp::Schema,
    ];
}

// ============================================================================
// UnitExport - 유닛이 제공하는 플러그인 타입
// ============================================================================

/// 유닛이 선언한 식별 정보 (메타데이터 파일이 없을 때 사용)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// 플러그인 인스턴스 생성기
#[async_trait]
pub trait UnitFactory: Send + Sync {
    /// 새 인스턴스 생성 (아직 초기화되지 않음)
    async fn instantiate(&self, ctx: &PluginContext) -> Result<Arc<dyn PluginUnit>>;
}

/// 클로저 기반 생성기
struct FnFactory<F>(F);

#[async_trait]
impl<F> UnitFactory for FnFactory<F>
where
    F: Fn() -> Arc<dyn PluginUnit> + Send + Sync,
{
    async fn instantiate(&self, _ctx: &PluginContext) -> Result<Arc<dyn PluginUnit>> {
        Ok((self.0)())
    }
}

/// 유닛이 내보내는 타입 하나
#[derive(Clone)]
pub struct UnitExport {
    /// 타입 이름 (모호성 에러 보고용)
    pub type_name: String,

    pub declared: DeclaredMetadata,

    /// 구현된 계약 연산
    pub operations: BTreeSet<ContractOp>,

    pub factory: Arc<dyn UnitFactory>,
}

impl UnitExport {
    pub fn new(
        type_name: impl Into<String>,
        operations: impl IntoIterator<Item = ContractOp>,
        factory: Arc<dyn UnitFactory>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            declared: DeclaredMetadata::default(),
            operations: operations.into_iter().collect(),
            factory,
        }
    }

    /// 네 연산을 모두 구현한 플러그인 타입
    pub fn plugin<F>(type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn PluginUnit> + Send + Sync + 'static,
    {
        Self::new(type_name, ContractOp::ALL, Arc::new(FnFactory(factory)))
    }

    /// 계약 일부만 구현한 보조 타입 (플러그인 후보 아님)
    pub fn helper<F>(
        type_name: impl Into<String>,
        operations: impl IntoIterator<Item = ContractOp>,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Arc<dyn PluginUnit> + Send + Sync + 'static,
    {
        Self::new(type_name, operations, Arc::new(FnFactory(factory)))
    }

    pub fn with_declared(mut self, declared: DeclaredMetadata) -> Self {
        self.declared = declared;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.declared.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.declared.version = Some(version.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.declared.description = Some(description.into());
        self
    }

    /// 플러그인 계약 충족 여부
    pub fn fulfils_contract(&self) -> bool {
        ContractOp::ALL.iter().all(|op| self.operations.contains(op))
    }
}

impl fmt::Debug for UnitExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitExport")
            .field("type_name", &self.type_name)
            .field("declared", &self.declared)
            .field("operations", &self.operations)
            .finish()
    }
}

// ============================================================================
// UnitLoader - 로더 인터페이스
// ============================================================================

/// 열린 유닛
#[derive(Debug, Clone)]
pub struct LoadableUnit {
    pub entry: PathBuf,

    /// 엔트리 포인트 원문 (정적 스캔용)
    pub source: String,

    pub exports: Vec<UnitExport>,
}

/// 유닛 로더
#[async_trait]
pub trait UnitLoader: Send + Sync {
    /// 로더 이름 (로그용)
    fn name(&self) -> &str;

    /// 처리 가능한 파일 확장자 (점 제외)
    fn extensions(&self) -> &[&'static str];

    fn handles(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions().iter().any(|x| x.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// 엔트리 포인트를 열어 내보낸 타입 목록 반환
    async fn open(&self, entry: &Path) -> Result<LoadableUnit>;
}
