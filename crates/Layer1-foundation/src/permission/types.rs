//! 플러그인 권한 타입 정의
//!
//! 권한은 고정된 닫힌 집합이며, 각 권한은 시스템 전역 기본값을 가집니다.
//! 플러그인별 권한 집합은 기본 매트릭스 위에 오버라이드를 덮어써서 계산합니다.

use super::overrides::PermissionOverrides;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 플러그인 권한 플래그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    // 파일 시스템
    ReadFiles,
    WriteFiles,
    ExecuteCommands,

    // 네트워크
    NetworkAccess,
    HttpRequests,

    // 시스템
    SystemInfo,
    EnvironmentVars,

    // 도구 조합
    ToolComposition,
    OtherTools,

    // 데이터베이스
    DatabaseRead,
    DatabaseWrite,

    // 설정
    ConfigRead,
    ConfigWrite,
}

impl Permission {
    /// 모든 권한 (선언 순서)
    pub const ALL: [Permission; 13] = [
        Permission::ReadFiles,
        Permission::WriteFiles,
        Permission::ExecuteCommands,
        Permission::NetworkAccess,
        Permission::HttpRequests,
        Permission::SystemInfo,
        Permission::EnvironmentVars,
        Permission::ToolComposition,
        Permission::OtherTools,
        Permission::DatabaseRead,
        Permission::DatabaseWrite,
        Permission::ConfigRead,
        Permission::ConfigWrite,
    ];

    /// 고위험 권한 (보안 리포트에서 회수 권고 대상)
    pub const HIGH_RISK: [Permission; 4] = [
        Permission::ExecuteCommands,
        Permission::WriteFiles,
        Permission::DatabaseWrite,
        Permission::ConfigWrite,
    ];

    /// 설정/직렬화용 토큰 (예: "read_files")
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadFiles => "read_files",
            Self::WriteFiles => "write_files",
            Self::ExecuteCommands => "execute_commands",
            Self::NetworkAccess => "network_access",
            Self::HttpRequests => "http_requests",
            Self::SystemInfo => "system_info",
            Self::EnvironmentVars => "environment_vars",
            Self::ToolComposition => "tool_composition",
            Self::OtherTools => "other_tools",
            Self::DatabaseRead => "database_read",
            Self::DatabaseWrite => "database_write",
            Self::ConfigRead => "config_read",
            Self::ConfigWrite => "config_write",
        }
    }

    /// 시스템 전역 기본값
    ///
    /// 시스템 정보 조회, 도구 조합, 설정 읽기만 기본 허용됩니다.
    pub fn default_granted(&self) -> bool {
        matches!(
            self,
            Self::SystemInfo | Self::ToolComposition | Self::ConfigRead
        )
    }

    /// 고위험 권한 여부
    pub fn is_high_risk(&self) -> bool {
        Self::HIGH_RISK.contains(self)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    /// 대소문자 무시 (`READ_FILES`, `read_files` 모두 허용)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == lowered)
            .ok_or_else(|| format!("unknown permission: {}", s))
    }
}

// ============================================================================
// PermissionMatrix - 기본 권한 매트릭스
// ============================================================================

/// 기본 권한 매트릭스 (플러그인과 무관)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionMatrix {
    defaults: BTreeMap<Permission, bool>,
}

impl PermissionMatrix {
    /// 보수적인 시스템 기본값
    pub fn conservative() -> Self {
        Self {
            defaults: Permission::ALL
                .iter()
                .map(|p| (*p, p.default_granted()))
                .collect(),
        }
    }

    /// 특정 권한의 기본값 변경 (호스트 정책용)
    pub fn with_default(mut self, permission: Permission, granted: bool) -> Self {
        self.defaults.insert(permission, granted);
        self
    }

    pub fn default_for(&self, permission: Permission) -> bool {
        self.defaults.get(&permission).copied().unwrap_or(false)
    }

    /// 기본값 위에 플러그인 오버라이드를 덮어써서 권한 집합 계산
    ///
    /// 순수 함수: 같은 (매트릭스, 오버라이드) 입력이면 항상 같은 결과.
    pub fn resolve(&self, overrides: &PermissionOverrides, plugin_name: &str) -> PermissionSet {
        let mut granted = self.defaults.clone();
        for (permission, value) in overrides.for_plugin(plugin_name) {
            granted.insert(permission, value);
        }
        PermissionSet { granted }
    }
}

impl Default for PermissionMatrix {
    fn default() -> Self {
        Self::conservative()
    }
}

// ============================================================================
// PermissionSet - 플러그인별 권한 집합
// ============================================================================

/// 플러그인별로 해석된 권한 집합 (모든 권한에 대해 값이 존재)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    granted: BTreeMap<Permission, bool>,
}

impl PermissionSet {
    /// 권한 허용 여부
    pub fn allows(&self, permission: Permission) -> bool {
        self.granted.get(&permission).copied().unwrap_or(false)
    }

    /// 허용된 권한 수
    pub fn granted_count(&self) -> usize {
        self.granted.values().filter(|g| **g).count()
    }

    /// 전체 권한 수
    pub fn total(&self) -> usize {
        self.granted.len()
    }

    /// 허용된 권한 목록
    pub fn granted(&self) -> Vec<Permission> {
        self.granted
            .iter()
            .filter(|(_, g)| **g)
            .map(|(p, _)| *p)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Permission, bool)> + '_ {
        self.granted.iter().map(|(p, g)| (*p, *g))
    }

    /// 문자열 키 맵으로 변환 (리포트/IPC 전달용)
    pub fn to_map(&self) -> BTreeMap<String, bool> {
        self.granted
            .iter()
            .map(|(p, g)| (p.as_str().to_string(), *g))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conservative_defaults() {
        let matrix = PermissionMatrix::conservative();

        assert!(matrix.default_for(Permission::SystemInfo));
        assert!(matrix.default_for(Permission::ToolComposition));
        assert!(matrix.default_for(Permission::ConfigRead));

        assert!(!matrix.default_for(Permission::ExecuteCommands));
        assert!(!matrix.default_for(Permission::WriteFiles));
        assert!(!matrix.default_for(Permission::NetworkAccess));
        assert!(!matrix.default_for(Permission::EnvironmentVars));
    }

    #[test]
    fn test_permission_parse() {
        assert_eq!("READ_FILES".parse::<Permission>(), Ok(Permission::ReadFiles));
        assert_eq!(
            "database_write".parse::<Permission>(),
            Ok(Permission::DatabaseWrite)
        );
        assert!("teleport".parse::<Permission>().is_err());
    }

    #[test]
    fn test_resolve_is_pure() {
        let matrix = PermissionMatrix::conservative();
        let mut overrides = PermissionOverrides::new();
        overrides.set("alpha", Permission::NetworkAccess, true);

        let first = matrix.resolve(&overrides, "alpha");
        let second = matrix.resolve(&overrides, "alpha");
        assert_eq!(first, second);
        assert_eq!(first.total(), Permission::ALL.len());
    }

    #[test]
    fn test_single_override_changes_single_flag() {
        let matrix = PermissionMatrix::conservative();
        let empty = PermissionOverrides::new();
        let before = matrix.resolve(&empty, "alpha");

        let mut overrides = PermissionOverrides::new();
        overrides.set("alpha", Permission::WriteFiles, true);
        let after = matrix.resolve(&overrides, "alpha");

        let changed: Vec<_> = Permission::ALL
            .iter()
            .filter(|p| before.allows(**p) != after.allows(**p))
            .collect();
        assert_eq!(changed, vec![&Permission::WriteFiles]);

        // 다른 플러그인에는 영향 없음
        assert_eq!(matrix.resolve(&overrides, "beta"), before);
    }

    #[test]
    fn test_override_can_revoke_default() {
        let matrix = PermissionMatrix::conservative();
        let mut overrides = PermissionOverrides::new();
        overrides.set("alpha", Permission::ConfigRead, false);

        let set = matrix.resolve(&overrides, "alpha");
        assert!(!set.allows(Permission::ConfigRead));
        assert_eq!(set.granted_count(), 2);
    }
}
