//! 환경 변수 소스
//!
//! 권한 오버라이드와 플러그인 설정은 환경 변수 형태의 key/value에서 읽습니다.
//! 테스트에서는 프로세스 환경을 건드리지 않도록 `MapEnv`를 사용합니다.

use std::collections::BTreeMap;

/// 환경 변수 형태의 key/value 소스
pub trait EnvSource: Send + Sync {
    /// 단일 키 조회
    fn get(&self, key: &str) -> Option<String>;

    /// 주어진 접두사로 시작하는 모든 (key, value) 쌍 (키 순서)
    fn with_prefix(&self, prefix: &str) -> Vec<(String, String)>;
}

/// 실제 프로세스 환경
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        let mut vars: Vec<_> = std::env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();
        vars.sort();
        vars
    }
}

/// 메모리 기반 환경 (테스트/임베딩용)
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: BTreeMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }
}

impl EnvSource for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        self.vars
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// truthy 값 판정: `true`, `1`, `yes`, `on` (대소문자 무시)
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// 플러그인 이름을 환경 변수 세그먼트로 변환 (`my-plugin` → `MY_PLUGIN`)
pub fn env_segment(name: &str) -> String {
    name.to_ascii_uppercase().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_values() {
        for v in ["true", "TRUE", "1", "yes", "On", " on "] {
            assert!(is_truthy(v), "{v} should be truthy");
        }
        for v in ["false", "0", "no", "off", "", "enabled"] {
            assert!(!is_truthy(v), "{v} should not be truthy");
        }
    }

    #[test]
    fn test_map_env_prefix() {
        let env = MapEnv::new()
            .with("PLUGIN_ALPHA_KEY", "1")
            .with("PLUGIN_BETA_KEY", "2")
            .with("PLUGINX", "3")
            .with("OTHER", "4");

        let vars = env.with_prefix("PLUGIN_");
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].0, "PLUGIN_ALPHA_KEY");
        assert_eq!(env.get("OTHER").as_deref(), Some("4"));
    }

    #[test]
    fn test_env_segment() {
        assert_eq!(env_segment("my-plugin"), "MY_PLUGIN");
        assert_eq!(env_segment("alpha"), "ALPHA");
    }
}
