//! Plugin Discovery - 플러그인 발견 및 인스턴스화
//!
//! 설정된 디렉토리들을 병렬로 스캔하여 `PluginDescriptor`를 만듭니다.
//!
//! - 파일 후보: 등록된 로더의 확장자, `_`(비공개) 나 `.`(숨김) 으로 시작하지 않음
//! - 디렉토리 후보: 숨김이 아니고 `plugin.<ext>` 또는 `main.<ext>` 엔트리 포인트를 가짐
//!   (엔트리 포인트가 없는 디렉토리는 무시)
//! - `plugin.json` 이 있으면 유닛이 선언한 메타데이터보다 우선
//!
//! 보안 게이트가 연결되어 있으면 엔트리 포인트는 유닛을 열기 전에 검증됩니다.
//! 프로세스 유닛은 `describe` 를 위해 실행되므로 거부된 후보는 절대 실행되지 않습니다.
//!
//! 후보 하나의 실패는 리포트에 기록되고 스캔은 계속됩니다.
//! 설정된 디렉토리 자체를 읽을 수 없으면 에러로 전파됩니다.

use super::loader::{UnitExport, UnitLoader};
use super::metadata::{MetadataFile, PluginMetadata};
use super::security::PluginSecurity;
use super::traits::{PluginContext, PluginUnit};
use futures::future::join_all;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use toolrack_foundation::{expand_home, Error, PluginSystemConfig, Result};
use tracing::{debug, info, warn};

// ============================================================================
// PluginDescriptor - 발견된 플러그인
// ============================================================================

/// 플러그인 형태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    /// 단일 파일 유닛
    File,
    /// 엔트리 포인트를 가진 디렉토리
    Directory,
}

/// 발견된 플러그인 (아직 인스턴스화되지 않음)
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub kind: PluginKind,

    /// 파일 자체 또는 디렉토리
    pub root: PathBuf,

    pub entry_point: PathBuf,

    pub metadata_file: Option<PathBuf>,

    pub metadata: PluginMetadata,

    /// 선택된 플러그인 타입
    pub export: UnitExport,

    /// 엔트리 포인트 원문 (정적 스캔용)
    pub source: Arc<str>,

    /// 유닛을 연 로더 이름
    pub loader: String,
}

impl PluginDescriptor {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// 후보 하나의 발견 실패
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub path: PathBuf,
    pub error: Error,
}

/// 발견 결과
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub descriptors: Vec<PluginDescriptor>,
    pub errors: Vec<DiscoveryFailure>,
}

impl DiscoveryReport {
    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(PluginDescriptor::name).collect()
    }
}

// ============================================================================
// PluginDiscovery - 플러그인 발견 시스템
// ============================================================================

/// 플러그인 발견 시스템
pub struct PluginDiscovery {
    /// 검색 디렉토리 (정규화, 추가 순서)
    directories: RwLock<Vec<PathBuf>>,

    /// 유닛 로더 (등록 순서 = 엔트리 포인트 우선순위)
    loaders: Vec<Arc<dyn UnitLoader>>,

    metadata_file: String,

    entry_stems: Vec<String>,

    private_prefix: String,

    /// 유닛을 열기 전 엔트리 포인트 검증
    security: RwLock<Option<Arc<PluginSecurity>>>,
}

impl PluginDiscovery {
    /// 새 발견 시스템 생성
    pub fn new(loaders: Vec<Arc<dyn UnitLoader>>) -> Self {
        let defaults = PluginSystemConfig::default();
        Self {
            directories: RwLock::new(Vec::new()),
            loaders,
            metadata_file: defaults.metadata_file,
            entry_stems: defaults.entry_stems,
            private_prefix: defaults.private_prefix,
            security: RwLock::new(None),
        }
    }

    /// 설정으로 생성 (설정된 디렉토리 추가)
    pub fn from_config(config: &PluginSystemConfig, loaders: Vec<Arc<dyn UnitLoader>>) -> Self {
        let discovery = Self {
            directories: RwLock::new(Vec::new()),
            loaders,
            metadata_file: config.metadata_file.clone(),
            entry_stems: config.entry_stems.clone(),
            private_prefix: config.private_prefix.clone(),
            security: RwLock::new(None),
        };
        for dir in &config.directories {
            discovery.add_directory(dir);
        }
        discovery
    }

    /// 보안 게이트 연결
    pub fn with_security(self, security: Arc<PluginSecurity>) -> Self {
        self.set_security(security);
        self
    }

    pub fn set_security(&self, security: Arc<PluginSecurity>) {
        *self.security.write() = Some(security);
    }

    /// 검색 디렉토리 추가
    ///
    /// 없거나 디렉토리가 아니면 경고 후 false. 이미 있으면 true.
    pub fn add_directory(&self, path: impl AsRef<Path>) -> bool {
        let path = expand_home(path.as_ref());

        let resolved = match path.canonicalize() {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Plugin directory does not exist: {:?} ({})", path, e);
                return false;
            }
        };

        if !resolved.is_dir() {
            warn!("Plugin path is not a directory: {:?}", resolved);
            return false;
        }

        let mut directories = self.directories.write();
        if directories.contains(&resolved) {
            debug!("Plugin directory already configured: {:?}", resolved);
            return true;
        }

        info!("Added plugin directory: {:?}", resolved);
        directories.push(resolved);
        true
    }

    /// 설정된 디렉토리 목록
    pub fn directories(&self) -> Vec<PathBuf> {
        self.directories.read().clone()
    }

    /// 인식하는 확장자 (모든 로더)
    pub fn extensions(&self) -> Vec<&'static str> {
        self.loaders
            .iter()
            .flat_map(|l| l.extensions().iter().copied())
            .collect()
    }

    // ========================================================================
    // 발견
    // ========================================================================

    /// 모든 디렉토리 스캔 (병렬, 결과는 디렉토리 순서)
    pub async fn discover_all(&self) -> Result<DiscoveryReport> {
        let directories = self.directories();
        let scans = join_all(directories.iter().map(|dir| self.scan_directory(dir))).await;

        let mut report = DiscoveryReport::default();
        for scan in scans {
            let (descriptors, errors) = scan?;
            report.descriptors.extend(descriptors);
            report.errors.extend(errors);
        }

        info!(
            "Discovered {} plugins ({} candidates failed)",
            report.descriptors.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// 디렉토리 하나 스캔 (자식은 이름 순)
    async fn scan_directory(
        &self,
        dir: &Path,
    ) -> Result<(Vec<PluginDescriptor>, Vec<DiscoveryFailure>)> {
        let unreadable = |e: std::io::Error| Error::DirectoryUnreadable {
            path: dir.to_path_buf(),
            message: e.to_string(),
        };

        let mut entries = fs::read_dir(dir).await.map_err(unreadable)?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
            children.push(entry.path());
        }
        children.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut descriptors = Vec::new();
        let mut failures = Vec::new();

        for path in children {
            let Some(kind) = self.classify(&path).await else {
                continue;
            };

            match self.describe_candidate(&path, kind).await {
                Ok(descriptor) => {
                    debug!(
                        "Found plugin: {} v{} at {:?}",
                        descriptor.metadata.name, descriptor.metadata.version, path
                    );
                    descriptors.push(descriptor);
                }
                Err(error) => {
                    warn!("Skipping plugin candidate {:?}: {}", path, error);
                    failures.push(DiscoveryFailure { path, error });
                }
            }
        }

        Ok((descriptors, failures))
    }

    /// 후보 판별 (후보가 아니면 None)
    async fn classify(&self, path: &Path) -> Option<PluginKind> {
        let name = path.file_name()?.to_str()?;
        if name.starts_with('.') {
            return None;
        }

        let meta = fs::metadata(path).await.ok()?;
        if meta.is_dir() {
            if self.find_entry_point(path).await.is_none() {
                debug!("No plugin entry point in {:?}, ignoring", path);
                return None;
            }
            return Some(PluginKind::Directory);
        }

        if meta.is_file()
            && !name.starts_with(self.private_prefix.as_str())
            && self.loader_for(path).is_some()
        {
            return Some(PluginKind::File);
        }

        None
    }

    fn loader_for(&self, path: &Path) -> Option<&Arc<dyn UnitLoader>> {
        self.loaders.iter().find(|l| l.handles(path))
    }

    /// 디렉토리 엔트리 포인트 탐색 (stem 우선순위 → 로더 순서 → 확장자 순서)
    async fn find_entry_point(&self, dir: &Path) -> Option<(Arc<dyn UnitLoader>, PathBuf)> {
        for stem in &self.entry_stems {
            for loader in &self.loaders {
                for ext in loader.extensions() {
                    let candidate = dir.join(format!("{}.{}", stem, ext));
                    if let Ok(meta) = fs::metadata(&candidate).await {
                        if meta.is_file() {
                            return Some((Arc::clone(loader), candidate));
                        }
                    }
                }
            }
        }
        None
    }

    /// 단일 경로 설명 (스캔 주기 밖, load_from_path 용)
    pub async fn describe_path(&self, path: impl AsRef<Path>) -> Result<PluginDescriptor> {
        let path = expand_home(path.as_ref());
        let meta = fs::metadata(&path).await?;

        let kind = if meta.is_dir() {
            PluginKind::Directory
        } else if self.loader_for(&path).is_some() {
            PluginKind::File
        } else {
            return Err(Error::UnsupportedUnit(path));
        };

        self.describe_candidate(&path, kind).await
    }

    /// 후보 하나로 설명자 생성
    async fn describe_candidate(&self, path: &Path, kind: PluginKind) -> Result<PluginDescriptor> {
        let (loader, entry_point, metadata_file) = match kind {
            PluginKind::File => {
                let loader = self
                    .loader_for(path)
                    .cloned()
                    .ok_or_else(|| Error::UnsupportedUnit(path.to_path_buf()))?;
                (loader, path.to_path_buf(), None)
            }
            PluginKind::Directory => {
                let (loader, entry) = self
                    .find_entry_point(path)
                    .await
                    .ok_or_else(|| Error::MissingEntryPoint(path.to_path_buf()))?;
                let metadata_file = path.join(&self.metadata_file);
                let metadata_file = fs::metadata(&metadata_file)
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false)
                    .then_some(metadata_file);
                (loader, entry, metadata_file)
            }
        };

        self.check_gate(&entry_point)?;

        // 메타데이터 파일이 깨져 있으면 유닛을 열기 전에 탈락
        let file_metadata = match &metadata_file {
            Some(file) => {
                let content = fs::read_to_string(file)
                    .await
                    .map_err(|e| Error::metadata(file, e.to_string()))?;
                Some(MetadataFile::parse(&content).map_err(|e| Error::metadata(file, e.to_string()))?)
            }
            None => None,
        };

        let unit = loader.open(&entry_point).await?;
        let export = select_export(&entry_point, unit.exports)?;

        let fallback_name = match kind {
            PluginKind::File => path.file_stem(),
            PluginKind::Directory => path.file_name(),
        }
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

        let mut fallback =
            PluginMetadata::new(export.declared.name.clone().unwrap_or(fallback_name));
        if let Some(version) = &export.declared.version {
            fallback.version = version.clone();
        }
        if let Some(description) = &export.declared.description {
            fallback.description = description.clone();
        }

        let metadata = match file_metadata {
            Some(file) => file.into_metadata(fallback),
            None => fallback,
        };

        if !metadata.is_complete() {
            return Err(Error::metadata(
                metadata_file.as_deref().unwrap_or(&entry_point),
                "plugin name and version must not be empty",
            ));
        }

        Ok(PluginDescriptor {
            kind,
            root: path.to_path_buf(),
            entry_point,
            metadata_file,
            metadata,
            export,
            source: Arc::from(unit.source),
            loader: loader.name().to_string(),
        })
    }

    fn check_gate(&self, entry_point: &Path) -> Result<()> {
        let Some(security) = self.security.read().clone() else {
            return Ok(());
        };
        security.validate(entry_point).map(|_| ()).map_err(|rejection| {
            warn!("Refusing to open plugin unit {:?}: {}", entry_point, rejection);
            rejection.into()
        })
    }

    // ========================================================================
    // 인스턴스화
    // ========================================================================

    /// 설명자의 타입을 인스턴스화하고 계약 준수 여부 확인
    pub async fn load(
        &self,
        descriptor: &PluginDescriptor,
        ctx: &PluginContext,
    ) -> Result<Arc<dyn PluginUnit>> {
        let instance = descriptor.export.factory.instantiate(ctx).await?;
        check_compliance(descriptor, instance.as_ref())?;
        debug!(
            "Instantiated plugin {} from {:?}",
            descriptor.metadata.name, descriptor.entry_point
        );
        Ok(instance)
    }
}

/// 계약을 충족하는 export 가 정확히 하나여야 함
fn select_export(entry: &Path, exports: Vec<UnitExport>) -> Result<UnitExport> {
    let mut candidates: Vec<UnitExport> =
        exports.into_iter().filter(UnitExport::fulfils_contract).collect();

    match candidates.len() {
        0 => Err(Error::MissingEntryPoint(entry.to_path_buf())),
        1 => Ok(candidates.remove(0)),
        _ => Err(Error::AmbiguousEntryPoint {
            path: entry.to_path_buf(),
            candidates: candidates.into_iter().map(|e| e.type_name).collect(),
        }),
    }
}

/// 인스턴스 계약 준수 확인
fn check_compliance(descriptor: &PluginDescriptor, instance: &dyn PluginUnit) -> Result<()> {
    if !descriptor.export.fulfils_contract() {
        return Err(Error::Plugin(format!(
            "{} does not implement the plugin contract",
            descriptor.export.type_name
        )));
    }
    if !instance.schema().is_object() {
        return Err(Error::Plugin(format!(
            "{} schema must be a JSON object",
            descriptor.metadata.name
        )));
    }
    if !descriptor.metadata.is_complete() {
        return Err(Error::Plugin(format!(
            "{} metadata must have a name and version",
            descriptor.root.display()
        )));
    }
    Ok(())
}
