//! 플러그인별 권한 오버라이드와 설정 소스
//!
//! 환경 변수 형식:
//! - 권한: `{PLUGIN_SECURITY}_{PLUGIN_NAME}_{PERMISSION}` = `true|1|yes|on`
//! - 설정: `{PLUGIN}_{PLUGIN_NAME}_{KEY}` = 임의 문자열

use super::types::Permission;
use crate::config::{env_segment, is_truthy, EnvSource};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// 플러그인 이름 정규화 (소문자, `-` ≡ `_`)
pub fn normalize_plugin_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

// ============================================================================
// PermissionOverrides
// ============================================================================

/// (플러그인, 권한) 단위 오버라이드 테이블
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionOverrides {
    entries: BTreeMap<String, BTreeMap<Permission, bool>>,
}

impl PermissionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// 환경 변수에서 오버라이드 수집
    ///
    /// 권한 토큰은 키의 끝부분과 매칭되며, 나머지가 플러그인 이름입니다.
    /// 알 수 없는 토큰은 경고 후 무시합니다.
    pub fn from_env(env: &dyn EnvSource, prefix: &str) -> Self {
        let key_prefix = format!("{}_", prefix);
        let mut overrides = Self::new();

        for (key, value) in env.with_prefix(&key_prefix) {
            let rest = key[key_prefix.len()..].to_ascii_uppercase();
            match split_permission_suffix(&rest) {
                Some((plugin, permission)) => {
                    debug!(
                        "Permission override from {}: {} {} = {}",
                        key,
                        plugin,
                        permission,
                        is_truthy(&value)
                    );
                    overrides.set(plugin, permission, is_truthy(&value));
                }
                None => {
                    warn!("Ignoring permission override with unknown token: {}", key);
                }
            }
        }

        overrides
    }

    /// 오버라이드 설정 (기존 값 대체)
    pub fn set(&mut self, plugin_name: &str, permission: Permission, granted: bool) {
        self.entries
            .entry(normalize_plugin_name(plugin_name))
            .or_default()
            .insert(permission, granted);
    }

    /// 런타임 권한 부여 (reload 후 반영)
    pub fn grant(&mut self, plugin_name: &str, permission: Permission) {
        info!("Granted {} to plugin {}", permission, plugin_name);
        self.set(plugin_name, permission, true);
    }

    /// 런타임 권한 회수 (reload 후 반영)
    pub fn revoke(&mut self, plugin_name: &str, permission: Permission) {
        info!("Revoked {} from plugin {}", permission, plugin_name);
        self.set(plugin_name, permission, false);
    }

    /// 특정 플러그인의 오버라이드 제거
    pub fn clear(&mut self, plugin_name: &str) -> bool {
        self.entries
            .remove(&normalize_plugin_name(plugin_name))
            .is_some()
    }

    /// 다른 테이블을 덮어쓰기 (other 우선)
    pub fn merge(&mut self, other: &PermissionOverrides) {
        for (plugin, perms) in &other.entries {
            let target = self.entries.entry(plugin.clone()).or_default();
            for (permission, granted) in perms {
                target.insert(*permission, *granted);
            }
        }
    }

    /// 플러그인에 적용되는 오버라이드 목록
    pub fn for_plugin(&self, plugin_name: &str) -> Vec<(Permission, bool)> {
        self.entries
            .get(&normalize_plugin_name(plugin_name))
            .map(|perms| perms.iter().map(|(p, g)| (*p, *g)).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `ALPHA_READ_FILES` → (`ALPHA`, ReadFiles). 가장 긴 접미사 우선.
fn split_permission_suffix(rest: &str) -> Option<(&str, Permission)> {
    Permission::ALL
        .iter()
        .filter_map(|permission| {
            let token = permission.as_str().to_ascii_uppercase();
            let plugin = rest.strip_suffix(token.as_str())?.strip_suffix('_')?;
            (!plugin.is_empty()).then_some((plugin, *permission, token.len()))
        })
        .max_by_key(|(_, _, len)| *len)
        .map(|(plugin, permission, _)| (plugin, permission))
}

// ============================================================================
// PluginConfigSource
// ============================================================================

/// 플러그인별 설정 수집기
#[derive(Debug, Clone)]
pub struct PluginConfigSource {
    prefix: String,
}

impl PluginConfigSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// `{prefix}_{NAME}_` 로 시작하는 키를 모아 소문자 키 맵으로 반환
    pub fn collect(&self, env: &dyn EnvSource, plugin_name: &str) -> BTreeMap<String, String> {
        let key_prefix = format!("{}_{}_", self.prefix, env_segment(plugin_name));
        env.with_prefix(&key_prefix)
            .into_iter()
            .filter_map(|(key, value)| {
                let name = key[key_prefix.len()..].to_ascii_lowercase();
                (!name.is_empty()).then_some((name, value))
            })
            .collect()
    }
}

impl Default for PluginConfigSource {
    fn default() -> Self {
        Self::new("PLUGIN")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapEnv;

    #[test]
    fn test_from_env_parses_plugin_and_permission() {
        let env = MapEnv::new()
            .with("PLUGIN_SECURITY_ALPHA_NETWORK_ACCESS", "yes")
            .with("PLUGIN_SECURITY_MY_TOOL_WRITE_FILES", "1")
            .with("PLUGIN_SECURITY_ALPHA_CONFIG_READ", "off");

        let overrides = PermissionOverrides::from_env(&env, "PLUGIN_SECURITY");

        let alpha = overrides.for_plugin("alpha");
        assert!(alpha.contains(&(Permission::NetworkAccess, true)));
        assert!(alpha.contains(&(Permission::ConfigRead, false)));

        // `-` 와 `_` 는 같은 이름
        assert_eq!(
            overrides.for_plugin("my-tool"),
            vec![(Permission::WriteFiles, true)]
        );
    }

    #[test]
    fn test_from_env_ignores_unknown_tokens() {
        let env = MapEnv::new()
            .with("PLUGIN_SECURITY_ALPHA_TELEPORT", "true")
            .with("PLUGIN_SECURITY_READ_FILES", "true");

        let overrides = PermissionOverrides::from_env(&env, "PLUGIN_SECURITY");
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_longest_suffix_wins() {
        // 이름에 권한 토큰이 포함되어도 마지막 토큰이 권한
        let (plugin, permission) = split_permission_suffix("READ_FILES_DATABASE_READ").unwrap();
        assert_eq!(plugin, "READ_FILES");
        assert_eq!(permission, Permission::DatabaseRead);
    }

    #[test]
    fn test_grant_and_revoke() {
        let mut overrides = PermissionOverrides::new();
        overrides.grant("beta", Permission::ExecuteCommands);
        assert_eq!(
            overrides.for_plugin("BETA"),
            vec![(Permission::ExecuteCommands, true)]
        );

        overrides.revoke("beta", Permission::ExecuteCommands);
        assert_eq!(
            overrides.for_plugin("beta"),
            vec![(Permission::ExecuteCommands, false)]
        );

        assert!(overrides.clear("beta"));
        assert!(overrides.for_plugin("beta").is_empty());
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = PermissionOverrides::new();
        base.set("alpha", Permission::ReadFiles, false);
        let mut runtime = PermissionOverrides::new();
        runtime.set("alpha", Permission::ReadFiles, true);

        base.merge(&runtime);
        assert_eq!(base.for_plugin("alpha"), vec![(Permission::ReadFiles, true)]);
    }

    #[test]
    fn test_config_source_collects_lowercase_keys() {
        let env = MapEnv::new()
            .with("PLUGIN_MY_TOOL_API_URL", "http://localhost")
            .with("PLUGIN_MY_TOOL_RETRIES", "3")
            .with("PLUGIN_OTHER_KEY", "x");

        let config = PluginConfigSource::default().collect(&env, "my-tool");
        assert_eq!(config.len(), 2);
        assert_eq!(config.get("api_url").map(String::as_str), Some("http://localhost"));
        assert_eq!(config.get("retries").map(String::as_str), Some("3"));
    }
}
