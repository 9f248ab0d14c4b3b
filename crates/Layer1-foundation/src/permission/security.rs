//! Security - 플러그인 소스 정적 위험 스캔
//!
//! 어휘 수준의 패턴 매칭만 수행합니다. 결과는 경고 문자열이며 로드를 막지 않고
//! 보안 리포트에만 노출됩니다.

use regex::Regex;
use std::sync::OnceLock;

// ============================================================
// 위험 패턴 분류
// ============================================================

/// 위험 패턴 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskKind {
    /// 위험 모듈 import
    Import,
    /// 동적 평가/리플렉션 호출
    Call,
    /// 파일 열기
    FileOperation,
}

impl RiskKind {
    fn message(&self, token: &str) -> String {
        match self {
            RiskKind::Import => format!("Potentially dangerous import detected: {}", token),
            RiskKind::Call => format!("Potentially dangerous function call: {}", token),
            RiskKind::FileOperation => format!("File operation detected: {}", token),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PatternType {
    Contains(String),
    Regex(Regex),
}

/// 위험 패턴 정의
#[derive(Debug, Clone)]
pub struct RiskPattern {
    pub kind: RiskKind,
    pub pattern: PatternType,
    /// 경고 메시지에 표시되는 토큰
    pub token: String,
}

impl RiskPattern {
    pub fn contains(kind: RiskKind, substring: impl Into<String>) -> Self {
        let substring = substring.into();
        Self {
            kind,
            token: substring.clone(),
            pattern: PatternType::Contains(substring),
        }
    }

    /// 정규식 패턴 (컴파일 실패 시 None)
    pub fn regex(kind: RiskKind, pattern: &str, token: impl Into<String>) -> Option<Self> {
        Regex::new(pattern).ok().map(|re| Self {
            kind,
            token: token.into(),
            pattern: PatternType::Regex(re),
        })
    }

    pub fn matches(&self, source: &str) -> bool {
        match &self.pattern {
            PatternType::Contains(s) => source.contains(s.as_str()),
            PatternType::Regex(re) => re.is_match(source),
        }
    }

    pub fn warning(&self) -> String {
        self.kind.message(&self.token)
    }
}

// ============================================================
// 기본 패턴 목록
// ============================================================

/// 기본 위험 패턴들
pub fn risk_patterns() -> &'static [RiskPattern] {
    static PATTERNS: OnceLock<Vec<RiskPattern>> = OnceLock::new();
    PATTERNS.get_or_init(build_patterns)
}

fn build_patterns() -> Vec<RiskPattern> {
    let mut patterns = Vec::new();

    // 위험 import
    for token in [
        "import os",
        "from os import",
        "import subprocess",
        "import sys",
        "import socket",
        "import pickle",
    ] {
        patterns.push(RiskPattern::contains(RiskKind::Import, token));
    }
    patterns.extend(RiskPattern::regex(
        RiskKind::Import,
        r#"require\(\s*['"](child_process|net|fs)['"]\s*\)"#,
        "require(<builtin>)",
    ));

    // 동적 평가 / 리플렉션
    for token in [
        "eval(",
        "exec(",
        "compile(",
        "__import__(",
        "getattr(",
        "setattr(",
        "delattr(",
    ] {
        patterns.push(RiskPattern::contains(RiskKind::Call, token));
    }

    // 파일 조작
    for token in ["open(", "file(", "with open"] {
        patterns.push(RiskPattern::contains(RiskKind::FileOperation, token));
    }

    patterns
}

/// 소스 텍스트 정적 스캔
///
/// 매칭된 패턴마다 경고 한 줄 (패턴 순서). 빈 결과 = 경고 없음.
pub fn scan_source(source: &str) -> Vec<String> {
    risk_patterns()
        .iter()
        .filter(|p| p.matches(source))
        .map(RiskPattern::warning)
        .collect()
}
