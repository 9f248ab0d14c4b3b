//! Plugin Security - 경로 검증, 권한 해석, 샌드박스, 보안 리포트
//!
//! 로드 전 게이트 역할을 합니다. 검증은 실패 시 닫히는(fail closed) 방식이며,
//! 권한은 기본 매트릭스 위에 플러그인별 오버라이드를 덮어써서 해석합니다.
//! 샌드박스 설명자는 권고용 메타데이터이며 프로세스 격리를 제공하지 않습니다.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use toolrack_foundation::config::{expand_home, EnvSource};
use toolrack_foundation::permission::{
    Permission, PermissionMatrix, PermissionOverrides, PermissionSet,
};
use toolrack_foundation::{Error, PluginSystemConfig, Result};
use tracing::{debug, info, warn};

// ============================================================================
// SecurityRejection - 검증 실패 사유
// ============================================================================

/// 경로 검증 실패 사유
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityRejection {
    /// 경로를 해석할 수 없음 (존재하지 않음 등)
    #[error("{}: cannot resolve path: {message}", path.display())]
    Unresolvable { path: PathBuf, message: String },

    /// 허용 디렉토리 밖
    #[error("{}: path is outside the allowed plugin directories", path.display())]
    OutsideAllowedDirectories { path: PathBuf },

    /// 일반 파일이 아님
    #[error("{}: path is not a regular file", path.display())]
    NotARegularFile { path: PathBuf },

    /// 모든 사용자가 쓸 수 있는 파일
    #[error("{}: file is world-writable", path.display())]
    WorldWritable { path: PathBuf },
}

impl SecurityRejection {
    pub fn path(&self) -> &Path {
        match self {
            Self::Unresolvable { path, .. }
            | Self::OutsideAllowedDirectories { path }
            | Self::NotARegularFile { path }
            | Self::WorldWritable { path } => path,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Unresolvable { message, .. } => format!("cannot resolve path: {}", message),
            Self::OutsideAllowedDirectories { .. } => {
                "path is outside the allowed plugin directories".to_string()
            }
            Self::NotARegularFile { .. } => "path is not a regular file".to_string(),
            Self::WorldWritable { .. } => "file is world-writable".to_string(),
        }
    }
}

impl From<SecurityRejection> for Error {
    fn from(rejection: SecurityRejection) -> Self {
        Error::security(rejection.path().to_path_buf(), rejection.reason())
    }
}

// ============================================================================
// SandboxDescriptor - 샌드박스 설명자
// ============================================================================

/// 항상 허용되는 모듈
const ALLOWED_MODULES: [&str; 7] = [
    "json", "re", "datetime", "math", "random", "string", "typing",
];

/// 프로세스 실행 관련 제한 모듈 (EXECUTE_COMMANDS 거부 시)
const PROCESS_MODULES: [&str; 4] = ["subprocess", "os.system", "commands", "popen2"];

/// 네트워크 관련 제한 모듈 (NETWORK_ACCESS 거부 시)
const NETWORK_MODULES: [&str; 5] = ["socket", "urllib", "requests", "httplib", "http.client"];

/// 삭제 관련 제한 모듈 (WRITE_FILES 거부 시)
const DELETE_MODULES: [&str; 3] = ["shutil.rmtree", "os.remove", "os.unlink"];

/// 플러그인 샌드박스 설명자
///
/// 임시 디렉토리는 마지막 복제본이 drop 될 때 삭제됩니다.
#[derive(Debug, Clone)]
pub struct SandboxDescriptor {
    pub plugin: String,
    pub permissions: PermissionSet,
    pub restricted_modules: Vec<String>,
    pub allowed_modules: Vec<String>,
    temp_dir: Option<Arc<TempDir>>,
}

impl SandboxDescriptor {
    /// 해석된 권한으로 설명자 생성
    pub fn build(plugin: impl Into<String>, permissions: PermissionSet) -> Result<Self> {
        let plugin = plugin.into();
        let mut restricted = Vec::new();

        if !permissions.allows(Permission::ExecuteCommands) {
            restricted.extend(PROCESS_MODULES.iter().map(|m| m.to_string()));
        }
        if !permissions.allows(Permission::NetworkAccess) {
            restricted.extend(NETWORK_MODULES.iter().map(|m| m.to_string()));
        }
        if !permissions.allows(Permission::WriteFiles) {
            restricted.extend(DELETE_MODULES.iter().map(|m| m.to_string()));
        }

        let temp_dir = if permissions.allows(Permission::WriteFiles) {
            let dir = tempfile::Builder::new()
                .prefix(&format!("plugin_{}_", plugin))
                .tempdir()?;
            debug!("Created sandbox directory for {}: {:?}", plugin, dir.path());
            Some(Arc::new(dir))
        } else {
            None
        };

        Ok(Self {
            plugin,
            permissions,
            restricted_modules: restricted,
            allowed_modules: ALLOWED_MODULES.iter().map(|m| m.to_string()).collect(),
            temp_dir,
        })
    }

    /// 전용 작업 디렉토리
    pub fn working_dir(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(|d| d.path())
    }

    pub fn is_restricted(&self, module: &str) -> bool {
        self.restricted_modules.iter().any(|m| m == module)
    }
}

// ============================================================================
// SecurityReport - 보안 리포트
// ============================================================================

/// 위험도
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// 허용 비율로 위험도 계산 (> 0.7 HIGH, > 0.4 MEDIUM)
    pub fn from_ratio(granted: usize, total: usize) -> Self {
        if total == 0 {
            return RiskLevel::Low;
        }
        let ratio = granted as f64 / total as f64;
        if ratio > 0.7 {
            RiskLevel::High
        } else if ratio > 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// 플러그인 보안 리포트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityReport {
    pub plugin: String,
    pub risk_level: RiskLevel,
    pub granted_permissions: usize,
    pub total_permissions: usize,
    pub permissions: BTreeMap<String, bool>,
    pub recommendations: Vec<String>,
    /// 정적 스캔 경고 (로드된 플러그인만)
    pub scan_warnings: Vec<String>,
}

impl SecurityReport {
    pub fn from_permissions(plugin: impl Into<String>, permissions: &PermissionSet) -> Self {
        let granted = permissions.granted_count();
        let total = permissions.total();

        let mut recommendations: Vec<String> = permissions
            .granted()
            .into_iter()
            .filter(Permission::is_high_risk)
            .map(|p| format!("Consider revoking high-risk permission: {}", p))
            .collect();

        if permissions.allows(Permission::NetworkAccess) {
            recommendations.push("Monitor network access for suspicious activity".to_string());
        }
        if granted == 0 {
            recommendations
                .push("Plugin has minimal permissions - good security posture".to_string());
        }

        Self {
            plugin: plugin.into(),
            risk_level: RiskLevel::from_ratio(granted, total),
            granted_permissions: granted,
            total_permissions: total,
            permissions: permissions.to_map(),
            recommendations,
            scan_warnings: Vec::new(),
        }
    }
}

// ============================================================================
// PluginSecurity - 보안 게이트
// ============================================================================

/// 플러그인 보안 관리자
pub struct PluginSecurity {
    /// 정규화된 허용 디렉토리 (비어 있으면 모두 거부)
    allowed_directories: Vec<PathBuf>,

    /// 기본 권한 매트릭스
    matrix: PermissionMatrix,

    /// 플러그인별 오버라이드 (런타임 변경 가능)
    overrides: RwLock<PermissionOverrides>,
}

impl PluginSecurity {
    /// 허용 디렉토리로 생성
    ///
    /// `~` 는 홈으로 확장되며, 해석할 수 없는 디렉토리는 경고 후 제외됩니다.
    pub fn new<I, P>(allowed_directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let allowed_directories = allowed_directories
            .into_iter()
            .filter_map(|dir| {
                let dir = expand_home(dir.as_ref());
                match dir.canonicalize() {
                    Ok(resolved) => Some(resolved),
                    Err(e) => {
                        warn!("Ignoring allowed plugin directory {:?}: {}", dir, e);
                        None
                    }
                }
            })
            .collect();

        Self {
            allowed_directories,
            matrix: PermissionMatrix::conservative(),
            overrides: RwLock::new(PermissionOverrides::new()),
        }
    }

    /// 설정 + 환경 변수 오버라이드로 생성
    ///
    /// `allowedDirectories` 가 비어 있으면 플러그인 디렉토리를 허용 목록으로 사용합니다.
    pub fn from_config(config: &PluginSystemConfig, env: &dyn EnvSource) -> Self {
        let allowed = if config.allowed_directories.is_empty() {
            &config.directories
        } else {
            &config.allowed_directories
        };
        let security = Self::new(allowed).with_overrides(
            PermissionOverrides::from_env(env, &config.security_prefix),
        );
        info!(
            "Plugin security initialized with {} allowed directories",
            security.allowed_directories.len()
        );
        security
    }

    pub fn with_matrix(mut self, matrix: PermissionMatrix) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn with_overrides(self, overrides: PermissionOverrides) -> Self {
        *self.overrides.write() = overrides;
        self
    }

    pub fn allowed_directories(&self) -> &[PathBuf] {
        &self.allowed_directories
    }

    // ========================================================================
    // 경로 검증
    // ========================================================================

    /// 플러그인 파일 검증
    ///
    /// 성공 시 정규화된 경로를 반환합니다.
    pub fn validate(&self, location: &Path) -> std::result::Result<PathBuf, SecurityRejection> {
        let resolved =
            location
                .canonicalize()
                .map_err(|e| SecurityRejection::Unresolvable {
                    path: location.to_path_buf(),
                    message: e.to_string(),
                })?;

        if !self
            .allowed_directories
            .iter()
            .any(|dir| resolved.starts_with(dir))
        {
            warn!("Plugin path outside allowed directories: {:?}", resolved);
            return Err(SecurityRejection::OutsideAllowedDirectories { path: resolved });
        }

        let meta = std::fs::metadata(&resolved).map_err(|e| SecurityRejection::Unresolvable {
            path: resolved.clone(),
            message: e.to_string(),
        })?;

        if !meta.is_file() {
            return Err(SecurityRejection::NotARegularFile { path: resolved });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o002 != 0 {
                warn!("Plugin file is world-writable: {:?}", resolved);
                return Err(SecurityRejection::WorldWritable { path: resolved });
            }
        }

        Ok(resolved)
    }

    // ========================================================================
    // 권한
    // ========================================================================

    /// 현재 오버라이드 기준 권한 해석
    pub fn resolve_permissions(&self, plugin_name: &str) -> PermissionSet {
        self.matrix.resolve(&self.overrides.read(), plugin_name)
    }

    /// 권한 부여 (로드된 플러그인은 reload 후 반영)
    pub fn grant(&self, plugin_name: &str, permission: Permission) {
        self.overrides.write().grant(plugin_name, permission);
    }

    /// 권한 회수 (로드된 플러그인은 reload 후 반영)
    pub fn revoke(&self, plugin_name: &str, permission: Permission) {
        self.overrides.write().revoke(plugin_name, permission);
    }

    /// 샌드박스 설명자 생성
    pub fn sandbox_descriptor(&self, plugin_name: &str) -> Result<SandboxDescriptor> {
        SandboxDescriptor::build(plugin_name, self.resolve_permissions(plugin_name))
    }

    /// 권한 기반 보안 리포트
    pub fn security_report(&self, plugin_name: &str) -> SecurityReport {
        SecurityReport::from_permissions(plugin_name, &self.resolve_permissions(plugin_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use toolrack_foundation::MapEnv;

    fn write_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "module = \"alpha\"\n").unwrap();
        path
    }

    #[test]
    fn test_validate_inside_allowed_directory() {
        let temp = TempDir::new().unwrap();
        let file = write_file(temp.path(), "alpha.toml");
        let security = PluginSecurity::new([temp.path()]);

        let resolved = security.validate(&file).unwrap();
        assert_eq!(resolved, file.canonicalize().unwrap());
    }

    #[test]
    fn test_validate_outside_allowed_directory() {
        let allowed = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let file = write_file(other.path(), "alpha.toml");
        let security = PluginSecurity::new([allowed.path()]);

        assert!(matches!(
            security.validate(&file),
            Err(SecurityRejection::OutsideAllowedDirectories { .. })
        ));
    }

    #[test]
    fn test_empty_allow_list_denies_everything() {
        let temp = TempDir::new().unwrap();
        let file = write_file(temp.path(), "alpha.toml");
        let security = PluginSecurity::new(Vec::<PathBuf>::new());

        let err: Error = security.validate(&file).unwrap_err().into();
        assert!(matches!(err, Error::SecurityRejected { .. }));
    }

    #[test]
    fn test_validate_rejects_directory_and_missing() {
        let temp = TempDir::new().unwrap();
        let security = PluginSecurity::new([temp.path()]);

        assert!(matches!(
            security.validate(temp.path()),
            Err(SecurityRejection::NotARegularFile { .. })
        ));
        assert!(matches!(
            security.validate(&temp.path().join("missing.toml")),
            Err(SecurityRejection::Unresolvable { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_rejects_world_writable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let file = write_file(temp.path(), "alpha.toml");
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o666)).unwrap();
        let security = PluginSecurity::new([temp.path()]);

        assert!(matches!(
            security.validate(&file),
            Err(SecurityRejection::WorldWritable { .. })
        ));
    }

    #[test]
    fn test_sandbox_restrictions_follow_permissions() {
        let security = PluginSecurity::new(Vec::<PathBuf>::new());

        let sandbox = security.sandbox_descriptor("alpha").unwrap();
        assert!(sandbox.is_restricted("subprocess"));
        assert!(sandbox.is_restricted("socket"));
        assert!(sandbox.is_restricted("os.remove"));
        assert!(sandbox.working_dir().is_none());
        assert_eq!(sandbox.allowed_modules.len(), 7);

        security.grant("alpha", Permission::WriteFiles);
        security.grant("alpha", Permission::NetworkAccess);
        let sandbox = security.sandbox_descriptor("alpha").unwrap();
        assert!(!sandbox.is_restricted("os.remove"));
        assert!(!sandbox.is_restricted("socket"));
        assert!(sandbox.is_restricted("subprocess"));

        let dir = sandbox.working_dir().unwrap().to_path_buf();
        assert!(dir.is_dir());
        drop(sandbox);
        assert!(!dir.exists());
    }

    #[test]
    fn test_security_report_levels() {
        let security = PluginSecurity::new(Vec::<PathBuf>::new());

        let report = security.security_report("alpha");
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert_eq!(report.granted_permissions, 3);
        assert_eq!(report.total_permissions, 13);
        assert!(report.recommendations.is_empty());

        for permission in [
            Permission::ExecuteCommands,
            Permission::WriteFiles,
            Permission::NetworkAccess,
        ] {
            security.grant("alpha", permission);
        }
        let report = security.security_report("alpha");
        // 6 / 13 > 0.4
        assert_eq!(report.risk_level, RiskLevel::Medium);
        assert!(report
            .recommendations
            .contains(&"Consider revoking high-risk permission: execute_commands".to_string()));
        assert!(report
            .recommendations
            .contains(&"Monitor network access for suspicious activity".to_string()));
    }

    #[test]
    fn test_report_praises_all_denied() {
        let mut overrides = PermissionOverrides::new();
        for permission in Permission::ALL {
            overrides.set("locked", permission, false);
        }
        let security = PluginSecurity::new(Vec::<PathBuf>::new()).with_overrides(overrides);

        let report = security.security_report("locked");
        assert_eq!(report.granted_permissions, 0);
        assert_eq!(
            report.recommendations,
            vec!["Plugin has minimal permissions - good security posture".to_string()]
        );
    }

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::from_ratio(10, 13), RiskLevel::High);
        assert_eq!(RiskLevel::from_ratio(6, 13), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_ratio(5, 13), RiskLevel::Low);
        assert_eq!(RiskLevel::from_ratio(0, 0), RiskLevel::Low);
    }

    #[test]
    fn test_allow_list_expands_home() {
        let home = expand_home(Path::new("~"));
        if !home.is_dir() {
            return;
        }

        let config = PluginSystemConfig::default().with_directory("~");
        let security = PluginSecurity::from_config(&config, &MapEnv::new());
        assert_eq!(security.allowed_directories(), &[home.canonicalize().unwrap()]);
    }

    #[test]
    fn test_from_config_reads_env_overrides() {
        let env = MapEnv::new().with("PLUGIN_SECURITY_ALPHA_HTTP_REQUESTS", "true");
        let security = PluginSecurity::from_config(&PluginSystemConfig::default(), &env);

        assert!(security
            .resolve_permissions("alpha")
            .allows(Permission::HttpRequests));
        assert!(!security
            .resolve_permissions("beta")
            .allows(Permission::HttpRequests));
    }
}
