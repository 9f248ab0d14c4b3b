//! Native loader - 호스트에 컴파일된 플러그인 모듈
//!
//! 디스크의 TOML 유닛 파일이 등록된 모듈 이름을 가리키면 그 모듈의 export 들이
//! 발견 대상이 됩니다.
//!
//! ```toml
//! module = "file_tree"
//! ```

use super::{LoadableUnit, UnitExport, UnitLoader};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use toolrack_foundation::{Error, Result};
use tracing::debug;

/// 네이티브 유닛 파일 확장자
pub const NATIVE_EXTENSION: &str = "toml";

#[derive(Debug, Deserialize)]
struct UnitFile {
    module: String,
}

/// 네이티브 모듈 로더
#[derive(Default)]
pub struct NativeLoader {
    modules: RwLock<HashMap<String, Vec<UnitExport>>>,
}

impl NativeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 모듈 등록 (같은 이름은 교체)
    pub fn register_module(&self, module: impl Into<String>, exports: Vec<UnitExport>) {
        let module = module.into();
        debug!(
            "Registered native module {} with {} exports",
            module,
            exports.len()
        );
        self.modules.write().insert(module, exports);
    }

    /// Builder 스타일 등록
    pub fn with_module(self, module: impl Into<String>, exports: Vec<UnitExport>) -> Self {
        self.register_module(module, exports);
        self
    }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.modules.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl UnitLoader for NativeLoader {
    fn name(&self) -> &str {
        "native"
    }

    fn extensions(&self) -> &[&'static str] {
        &[NATIVE_EXTENSION]
    }

    async fn open(&self, entry: &Path) -> Result<LoadableUnit> {
        let source = tokio::fs::read_to_string(entry).await?;
        let unit: UnitFile = toml::from_str(&source)
            .map_err(|e| Error::metadata(entry, format!("invalid unit file: {}", e)))?;

        let exports = self
            .modules
            .read()
            .get(&unit.module)
            .cloned()
            .ok_or_else(|| {
                Error::metadata(entry, format!("unknown native module '{}'", unit.module))
            })?;

        Ok(LoadableUnit {
            entry: entry.to_path_buf(),
            source,
            exports,
        })
    }
}
