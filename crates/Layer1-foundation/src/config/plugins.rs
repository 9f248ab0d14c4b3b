//! Plugin system config - 플러그인 호스트 설정
//!
//! 전역 설정 파일(`plugins.json`) 위에 환경 변수를 덮어써서 최종 설정을 만듭니다.

use super::env::{EnvSource, ProcessEnv};
use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 설정 파일명
pub const PLUGINS_CONFIG_FILE: &str = "plugins.json";

/// 플러그인 디렉토리 목록 환경 변수 (OS 경로 구분자)
pub const ENV_PLUGIN_DIRS: &str = "TOOLRACK_PLUGIN_DIRS";
/// 허용 디렉토리 목록 환경 변수 (OS 경로 구분자)
pub const ENV_ALLOWED_DIRS: &str = "TOOLRACK_ALLOWED_PLUGIN_DIRS";
/// 초기화 타임아웃 (초)
pub const ENV_INIT_TIMEOUT: &str = "TOOLRACK_PLUGIN_INIT_TIMEOUT";
/// 정리 타임아웃 (초)
pub const ENV_CLEANUP_TIMEOUT: &str = "TOOLRACK_PLUGIN_CLEANUP_TIMEOUT";

// ============================================================================
// PluginSystemConfig
// ============================================================================

/// 플러그인 시스템 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginSystemConfig {
    /// 스캔할 플러그인 디렉토리 (순서 유지)
    pub directories: Vec<PathBuf>,

    /// 로드가 허용되는 디렉토리 (비어 있으면 모두 거부)
    pub allowed_directories: Vec<PathBuf>,

    /// 권한 오버라이드 환경 변수 접두사
    pub security_prefix: String,

    /// 플러그인별 설정 환경 변수 접두사
    pub config_prefix: String,

    /// `initialize()` 타임아웃 (초)
    pub init_timeout_secs: u64,

    /// `cleanup()` 타임아웃 (초)
    pub cleanup_timeout_secs: u64,

    /// 의존성이 없으면 로드 실패로 처리
    pub require_dependencies: bool,

    /// 메타데이터 파일명
    pub metadata_file: String,

    /// 디렉토리 플러그인의 엔트리 포인트 이름 (우선순위 순)
    pub entry_stems: Vec<String>,

    /// 비공개 파일 접두사 (스캔 제외)
    pub private_prefix: String,
}

impl Default for PluginSystemConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            allowed_directories: Vec::new(),
            security_prefix: "PLUGIN_SECURITY".to_string(),
            config_prefix: "PLUGIN".to_string(),
            init_timeout_secs: 30,
            cleanup_timeout_secs: 30,
            require_dependencies: false,
            metadata_file: "plugin.json".to_string(),
            entry_stems: vec!["plugin".to_string(), "main".to_string()],
            private_prefix: "_".to_string(),
        }
    }
}

impl PluginSystemConfig {
    /// 전역 설정 + 프로세스 환경
    pub fn load() -> Result<Self> {
        let base = match JsonStore::global() {
            Ok(store) => store
                .load_optional::<Self>(PLUGINS_CONFIG_FILE)?
                .unwrap_or_default(),
            Err(e) => {
                tracing::debug!("No global config directory, using defaults: {}", e);
                Self::default()
            }
        };
        base.with_env(&ProcessEnv)
    }

    /// 특정 저장소에서 로드 (없으면 기본값)
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        Ok(store
            .load_optional::<Self>(PLUGINS_CONFIG_FILE)?
            .unwrap_or_default())
    }

    /// 전역 설정 저장
    pub fn save_global(&self) -> Result<()> {
        JsonStore::global()?.save(PLUGINS_CONFIG_FILE, self)
    }

    /// 환경 변수 덮어쓰기
    pub fn with_env(mut self, env: &dyn EnvSource) -> Result<Self> {
        if let Some(dirs) = env.get(ENV_PLUGIN_DIRS) {
            self.directories = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(dirs) = env.get(ENV_ALLOWED_DIRS) {
            self.allowed_directories = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(secs) = env.get(ENV_INIT_TIMEOUT) {
            self.init_timeout_secs = parse_secs(ENV_INIT_TIMEOUT, &secs)?;
        }
        if let Some(secs) = env.get(ENV_CLEANUP_TIMEOUT) {
            self.cleanup_timeout_secs = parse_secs(ENV_CLEANUP_TIMEOUT, &secs)?;
        }
        Ok(self)
    }

    // Builder 스타일

    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directories.push(dir.into());
        self
    }

    pub fn with_allowed_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.allowed_directories.push(dir.into());
        self
    }

    pub fn with_timeouts(mut self, init: Duration, cleanup: Duration) -> Self {
        self.init_timeout_secs = init.as_secs();
        self.cleanup_timeout_secs = cleanup.as_secs();
        self
    }

    pub fn with_require_dependencies(mut self, require: bool) -> Self {
        self.require_dependencies = require;
        self
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }
}

/// 선행 `~` 를 홈 디렉토리로 확장 (홈을 모르면 그대로)
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number of seconds, got {:?}", key, value)))
}
