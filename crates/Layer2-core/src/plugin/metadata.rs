//! Plugin Metadata - 플러그인 식별 정보와 상태
//!
//! - `PluginMetadata`: 발견 시점에 확정되는 불변 식별 정보
//! - `MetadataFile`: `plugin.json` 파일 형식 (`name` 필수)
//! - `PluginStatus`: 라이프사이클 상태와 전이 테이블

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 기본 플러그인 버전
pub const DEFAULT_VERSION: &str = "1.0.0";

/// 기본 MCP 프로토콜 리비전
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// 기본 런타임 버전 제약
pub const DEFAULT_RUNTIME_VERSION: &str = "*";

// ============================================================================
// PluginMetadata
// ============================================================================

/// 플러그인 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PluginMetadata {
    /// 고유 이름 (레지스트리 키)
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    /// 태그 (순서 없음)
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// 의존성 (이름 + 선택적 버전 제약, 순서 유지)
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// MCP 프로토콜 리비전
    pub protocol_version: String,

    /// 호환 런타임 버전 제약
    pub runtime_version: String,
}

impl PluginMetadata {
    /// 이름만으로 생성 (나머지는 기본값)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: DEFAULT_VERSION.to_string(),
            description: String::new(),
            author: None,
            email: None,
            license: None,
            homepage: None,
            tags: BTreeSet::new(),
            dependencies: Vec::new(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            runtime_version: DEFAULT_RUNTIME_VERSION.to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// 의존성 이름 목록 (버전 제약 제거)
    pub fn dependency_names(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .map(|d| dependency_name(d))
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// 필수 식별 필드 확인
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && !self.version.trim().is_empty()
    }
}

/// `"alpha>=1.2"` → `"alpha"`
pub fn dependency_name(constraint: &str) -> &str {
    let end = constraint
        .find(|c: char| matches!(c, '<' | '>' | '=' | '!' | '~' | '^' | ' ' | '@'))
        .unwrap_or(constraint.len());
    constraint[..end].trim()
}

// ============================================================================
// MetadataFile - plugin.json
// ============================================================================

/// `plugin.json` 파일 형식
///
/// `name` 은 필수입니다. 없는 나머지 필드는 유닛이 선언한 값이나 기본값으로 채웁니다.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataFile {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub email: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(alias = "mcp_version")]
    pub protocol_version: Option<String>,
    #[serde(alias = "python_version")]
    pub runtime_version: Option<String>,
}

impl MetadataFile {
    /// JSON 파싱 (`//`, `/* */` 주석 허용)
    pub fn parse(content: &str) -> serde_json::Result<Self> {
        let file: Self = serde_json::from_str(&strip_json_comments(content))?;
        if file.name.trim().is_empty() {
            return Err(serde::de::Error::custom("plugin name must not be empty"));
        }
        Ok(file)
    }

    /// 파일 값 우선으로 메타데이터 구성
    pub fn into_metadata(self, fallback: PluginMetadata) -> PluginMetadata {
        PluginMetadata {
            name: self.name,
            version: self.version.unwrap_or(fallback.version),
            description: self.description.unwrap_or(fallback.description),
            author: self.author.or(fallback.author),
            email: self.email.or(fallback.email),
            license: self.license.or(fallback.license),
            homepage: self.homepage.or(fallback.homepage),
            tags: if self.tags.is_empty() {
                fallback.tags
            } else {
                self.tags.into_iter().collect()
            },
            dependencies: if self.dependencies.is_empty() {
                fallback.dependencies
            } else {
                self.dependencies
            },
            protocol_version: self.protocol_version.unwrap_or(fallback.protocol_version),
            runtime_version: self.runtime_version.unwrap_or(fallback.runtime_version),
        }
    }
}

/// JSON 주석 제거 (문자열 내부는 유지)
pub fn strip_json_comments(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            output.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                output.push(c);
            }
            ('/', Some('/')) => {
                // 라인 주석: 개행은 유지
                for c in chars.by_ref() {
                    if c == '\n' {
                        output.push(c);
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => output.push(c),
        }
    }

    output
}

// ============================================================================
// PluginStatus
// ============================================================================

/// 플러그인 라이프사이클 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Discovered,
    Loading,
    Loaded,
    Active,
    Error,
    Unloading,
    Unloaded,
}

impl PluginStatus {
    /// 허용된 상태 전이인지 확인
    pub fn can_transition_to(&self, next: PluginStatus) -> bool {
        use PluginStatus::*;
        matches!(
            (self, next),
            (Discovered, Loading)
                | (Loading, Loaded)
                | (Loading, Error)
                | (Loaded, Active)
                | (Loaded, Error)
                | (Loaded, Unloading)
                | (Active, Unloading)
                | (Unloading, Unloaded)
                | (Unloading, Error)
                | (Error, Loading)
                | (Error, Unloaded)
                | (Unloaded, Loading)
        )
    }

    /// 다른 작업이 진행 중인 상태
    pub fn is_busy(&self) -> bool {
        matches!(self, PluginStatus::Loading | PluginStatus::Unloading)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Active => "active",
            Self::Error => "error",
            Self::Unloading => "unloading",
            Self::Unloaded => "unloaded",
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults() {
        let meta = PluginMetadata::new("alpha");
        assert_eq!(meta.version, "1.0.0");
        assert_eq!(meta.protocol_version, "2025-03-26");
        assert_eq!(meta.runtime_version, "*");
        assert!(meta.is_complete());
        assert!(!PluginMetadata::new("  ").is_complete());
    }

    #[test]
    fn test_metadata_file_overrides_fallback() {
        let content = r#"{
            // 주석 허용
            "name": "beta",
            "version": "2.3.1",
            "tags": ["experimental", "experimental"],
            /* block */ "mcp_version": "2024-11-05"
        }"#;

        let file = MetadataFile::parse(content).unwrap();
        let fallback = PluginMetadata::new("declared-beta").with_description("declared");
        let meta = file.into_metadata(fallback);

        assert_eq!(meta.name, "beta");
        assert_eq!(meta.version, "2.3.1");
        assert_eq!(meta.description, "declared");
        assert_eq!(meta.tags.len(), 1);
        assert!(meta.tags.contains("experimental"));
        assert_eq!(meta.protocol_version, "2024-11-05");
    }

    #[test]
    fn test_metadata_file_requires_name() {
        let missing = MetadataFile::parse(r#"{ "version": "2.0.0" }"#).unwrap_err();
        assert!(missing.to_string().contains("name"));

        let blank = MetadataFile::parse(r#"{ "name": "  ", "version": "2.0.0" }"#).unwrap_err();
        assert!(blank.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let stripped = strip_json_comments(r#"{"url": "http://x//y", "a": "/*keep*/"} // tail"#);
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["url"], "http://x//y");
        assert_eq!(value["a"], "/*keep*/");
    }

    #[test]
    fn test_dependency_names() {
        let meta = PluginMetadata::new("gamma")
            .with_dependency("alpha>=1.0")
            .with_dependency("beta");
        assert_eq!(meta.dependency_names(), vec!["alpha", "beta"]);
        assert_eq!(dependency_name("delta ~= 2"), "delta");
    }

    #[test]
    fn test_status_transitions() {
        use PluginStatus::*;
        assert!(Discovered.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Error));
        assert!(Active.can_transition_to(Unloading));
        assert!(Unloaded.can_transition_to(Loading));

        assert!(!Active.can_transition_to(Loading));
        assert!(!Loading.can_transition_to(Active));
        assert!(!Unloading.can_transition_to(Active));
        assert!(Loading.is_busy() && Unloading.is_busy() && !Active.is_busy());
    }
}
