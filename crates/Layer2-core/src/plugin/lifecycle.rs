//! Lifecycle Registry - 플러그인 라이프사이클 관리
//!
//! 이름별 슬롯이 직렬화 지점입니다. 슬롯 상태는 `parking_lot::RwLock` 안에서
//! check-and-set 으로만 바뀌며, 락은 `.await` 를 넘어 유지되지 않습니다.
//!
//! ```text
//!  load_and_register:  validate → reserve(Loading) → initialize → Loaded
//!                      → [lock] host.register + Active
//!  unload:             Active → Unloading → cleanup
//!                      → [lock] host.unregister + Unloaded + remove
//! ```
//!
//! 각 슬롯은 티켓을 가집니다. `shutdown_all` 이 로드 중인 슬롯을 제거하면
//! 진행 중이던 로드는 다음 커밋 지점에서 티켓 불일치를 보고 스스로 정리합니다.

use super::discovery::{PluginDescriptor, PluginDiscovery};
use super::events::{EventBus, LifecycleEvent, LifecycleEventKind};
use super::host::{CapabilityRegistry, PluginTool};
use super::loader::UnitLoader;
use super::metadata::{PluginMetadata, PluginStatus};
use super::security::{PluginSecurity, SandboxDescriptor, SecurityReport};
use super::traits::{PluginContext, PluginUnit};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use toolrack_foundation::{
    scan_source, EnvSource, Error, PermissionSet, PluginConfigSource, PluginSystemConfig,
    ProcessEnv, Result,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Plugin - 살아있는 플러그인 엔티티
// ============================================================================

/// 로드된 플러그인
///
/// 권한, 설정, 샌드박스는 로드 시점의 스냅샷이며 `reload` 로만 갱신됩니다.
pub struct Plugin {
    name: String,
    metadata: PluginMetadata,
    permissions: PermissionSet,
    configuration: BTreeMap<String, String>,
    origin: PathBuf,
    unit: Arc<dyn PluginUnit>,
    instance_id: Uuid,
    loaded_at: DateTime<Utc>,
    scan_warnings: Vec<String>,
    sandbox: SandboxDescriptor,
}

impl Plugin {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn configuration(&self) -> &BTreeMap<String, String> {
        &self.configuration
    }

    /// 검증된 엔트리 포인트 경로
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn unit(&self) -> &Arc<dyn PluginUnit> {
        &self.unit
    }

    /// 로드마다 새로 발급되는 식별자
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn scan_warnings(&self) -> &[String] {
        &self.scan_warnings
    }

    pub fn sandbox(&self) -> &SandboxDescriptor {
        &self.sandbox
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("version", &self.metadata.version)
            .field("origin", &self.origin)
            .field("instance_id", &self.instance_id)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

// ============================================================================
// Reports
// ============================================================================

/// 상태 스냅샷 항목
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatusReport {
    pub name: String,
    pub status: PluginStatus,
    pub version: String,
}

/// 이름(또는 경로)별 실패
#[derive(Debug, Clone, Serialize)]
pub struct PluginFailure {
    pub name: String,
    pub message: String,
}

impl PluginFailure {
    fn new(name: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            message: error.to_string(),
        }
    }
}

/// 언로드 결과 (cleanup 실패는 치명적이지 않음)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnloadReport {
    pub name: String,
    pub cleanup_error: Option<String>,
}

/// shutdown_all 결과
///
/// `total` 은 cleanup 대상이던 ACTIVE 플러그인 수이며, 로드/언로드 도중
/// 제거된 슬롯은 `evicted` 에만 기록됩니다.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<PluginFailure>,
    pub evicted: Vec<String>,
}

/// initialize_plugins 결과
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationSummary {
    pub discovered: usize,
    pub loaded: usize,
    pub failed: usize,
    /// 발견 실패(경로) + 로드 실패(이름)
    pub errors: Vec<PluginFailure>,
}

// ============================================================================
// Slots - 이름별 상태 저장소
// ============================================================================

struct Slot {
    status: PluginStatus,
    plugin: Option<Arc<Plugin>>,
    descriptor: PluginDescriptor,
    ticket: u64,
    order: u64,
}

#[derive(Default)]
struct Slots {
    entries: HashMap<String, Slot>,
    next_order: u64,
    next_ticket: u64,
}

impl Slots {
    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// 티켓이 일치하는 슬롯
    fn owned_mut(&mut self, name: &str, ticket: u64) -> Option<&mut Slot> {
        self.entries
            .get_mut(name)
            .filter(|slot| slot.ticket == ticket)
    }

    fn active_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, slot)| slot.status == PluginStatus::Active)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

type SharedSlots = Arc<RwLock<Slots>>;

/// 로드 예약 - drop 시 슬롯 제거 (취소된 로드도 흔적을 남기지 않음)
struct LoadReservation {
    slots: SharedSlots,
    name: String,
    ticket: u64,
    /// 초기화가 끝난 인스턴스 (정리 대상)
    instance: Option<Arc<dyn PluginUnit>>,
    cleanup_timeout: Duration,
    committed: bool,
}

impl LoadReservation {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for LoadReservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        {
            let mut slots = self.slots.write();
            if slots.owned_mut(&self.name, self.ticket).is_some() {
                slots.entries.remove(&self.name);
                debug!("Released load reservation for {}", self.name);
            }
        }

        if let Some(instance) = self.instance.take() {
            spawn_cleanup(self.name.clone(), instance, self.cleanup_timeout);
        }
    }
}

/// 언로드 진행 표시 - drop 시 언로드 마무리
struct UnloadGuard {
    slots: SharedSlots,
    host: Arc<dyn CapabilityRegistry>,
    name: String,
    ticket: u64,
    finished: bool,
}

impl UnloadGuard {
    /// 한 락 안에서 unregister + Unloaded + 제거. shutdown 이 먼저 가져갔으면 false.
    fn finish(&mut self) -> bool {
        self.finished = true;
        let mut slots = self.slots.write();
        let Some(slot) = slots.owned_mut(&self.name, self.ticket) else {
            return false;
        };
        slot.status = PluginStatus::Unloaded;
        self.host.unregister(&self.name);
        slots.entries.remove(&self.name);
        true
    }
}

impl Drop for UnloadGuard {
    fn drop(&mut self) {
        if !self.finished && self.finish() {
            debug!("Finalized interrupted unload of {}", self.name);
        }
    }
}

async fn cleanup_with_timeout(unit: &dyn PluginUnit, limit: Duration) -> Result<()> {
    match tokio::time::timeout(limit, unit.cleanup()).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "cleanup did not finish within {:?}",
            limit
        ))),
    }
}

/// 런타임 밖(또는 drop 경로)에서의 정리
fn spawn_cleanup(name: String, instance: Arc<dyn PluginUnit>, limit: Duration) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = cleanup_with_timeout(instance.as_ref(), limit).await {
                    warn!("Cleanup of abandoned plugin {} failed: {}", name, e);
                }
            });
        }
        Err(_) => warn!("No runtime available to clean up plugin {}", name),
    }
}

// ============================================================================
// LifecycleRegistry
// ============================================================================

/// 플러그인 라이프사이클 레지스트리
pub struct LifecycleRegistry {
    discovery: Arc<PluginDiscovery>,
    security: Arc<PluginSecurity>,
    host: Arc<dyn CapabilityRegistry>,
    env: Arc<dyn EnvSource>,
    config_source: PluginConfigSource,
    init_timeout: Duration,
    cleanup_timeout: Duration,
    require_dependencies: bool,
    events: Arc<EventBus>,
    slots: SharedSlots,
}

impl LifecycleRegistry {
    /// 발견 시스템에 보안 게이트를 연결하여 생성
    pub fn new(
        discovery: Arc<PluginDiscovery>,
        security: Arc<PluginSecurity>,
        host: Arc<dyn CapabilityRegistry>,
    ) -> Self {
        discovery.set_security(Arc::clone(&security));
        Self {
            discovery,
            security,
            host,
            env: Arc::new(ProcessEnv),
            config_source: PluginConfigSource::default(),
            init_timeout: DEFAULT_TIMEOUT,
            cleanup_timeout: DEFAULT_TIMEOUT,
            require_dependencies: false,
            events: Arc::new(EventBus::new()),
            slots: Arc::new(RwLock::new(Slots::default())),
        }
    }

    /// 설정으로 전체 구성
    pub fn from_config(
        config: &PluginSystemConfig,
        loaders: Vec<Arc<dyn UnitLoader>>,
        host: Arc<dyn CapabilityRegistry>,
        env: Arc<dyn EnvSource>,
    ) -> Self {
        let discovery = Arc::new(PluginDiscovery::from_config(config, loaders));
        let security = Arc::new(PluginSecurity::from_config(config, env.as_ref()));

        Self::new(discovery, security, host)
            .with_env(env)
            .with_config_prefix(config.config_prefix.clone())
            .with_timeouts(config.init_timeout(), config.cleanup_timeout())
            .with_require_dependencies(config.require_dependencies)
    }

    /// 플러그인 설정을 읽을 환경
    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    pub fn with_config_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config_source = PluginConfigSource::new(prefix);
        self
    }

    pub fn with_timeouts(mut self, init: Duration, cleanup: Duration) -> Self {
        self.init_timeout = init;
        self.cleanup_timeout = cleanup;
        self
    }

    /// 의존성 누락을 로드 실패로 처리
    pub fn with_require_dependencies(mut self, require: bool) -> Self {
        self.require_dependencies = require;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn discovery(&self) -> &Arc<PluginDiscovery> {
        &self.discovery
    }

    pub fn security(&self) -> &Arc<PluginSecurity> {
        &self.security
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// 라이프사이클 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    async fn emit(&self, event: LifecycleEvent) {
        self.events.publish(event).await;
    }

    // ========================================================================
    // 로드
    // ========================================================================

    /// 검증 → 예약 → 초기화 → 호스트 등록
    pub async fn load_and_register(&self, descriptor: PluginDescriptor) -> Result<Arc<Plugin>> {
        let name = descriptor.metadata.name.clone();

        let origin = match self.security.validate(&descriptor.entry_point) {
            Ok(origin) => origin,
            Err(rejection) => {
                warn!("Security validation failed for plugin {}: {}", name, rejection);
                self.emit(
                    LifecycleEvent::new(LifecycleEventKind::SecurityRejected, &name)
                        .with_message(rejection.reason()),
                )
                .await;
                return Err(rejection.into());
            }
        };

        let mut reservation = self.reserve(&name, &descriptor)?;
        info!("Loading plugin: {} v{}", name, descriptor.metadata.version);
        self.emit(
            LifecycleEvent::new(LifecycleEventKind::Loading, &name)
                .with_status(PluginStatus::Loading),
        )
        .await;

        let outcome = self.activate(&mut reservation, &descriptor, origin).await;
        match outcome {
            Ok(plugin) => {
                reservation.commit();
                info!("Activated plugin: {} v{}", name, plugin.metadata.version);
                self.emit(
                    LifecycleEvent::new(LifecycleEventKind::Activated, &name)
                        .with_status(PluginStatus::Active),
                )
                .await;
                Ok(plugin)
            }
            Err(e) => {
                if let Some(instance) = reservation.instance.take() {
                    if let Err(cleanup_err) =
                        cleanup_with_timeout(instance.as_ref(), self.cleanup_timeout).await
                    {
                        warn!("Cleanup after failed load of {} failed: {}", name, cleanup_err);
                    }
                }
                self.mark_error(&name, reservation.ticket);
                drop(reservation);

                error!("Failed to load plugin {}: {}", name, e);
                self.emit(
                    LifecycleEvent::new(LifecycleEventKind::LoadFailed, &name)
                        .with_status(PluginStatus::Error)
                        .with_message(e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    /// 이름 예약 (check-and-set)
    fn reserve(&self, name: &str, descriptor: &PluginDescriptor) -> Result<LoadReservation> {
        let mut slots = self.slots.write();

        if let Some(slot) = slots.entries.get(name) {
            return Err(match slot.status {
                PluginStatus::Active | PluginStatus::Loaded => {
                    Error::AlreadyLoaded(name.to_string())
                }
                status => Error::Busy {
                    name: name.to_string(),
                    status: status.to_string(),
                },
            });
        }

        let ticket = slots.issue_ticket();
        slots.next_order += 1;
        let order = slots.next_order;
        slots.entries.insert(
            name.to_string(),
            Slot {
                status: PluginStatus::Loading,
                plugin: None,
                descriptor: descriptor.clone(),
                ticket,
                order,
            },
        );

        Ok(LoadReservation {
            slots: Arc::clone(&self.slots),
            name: name.to_string(),
            ticket,
            instance: None,
            cleanup_timeout: self.cleanup_timeout,
            committed: false,
        })
    }

    /// 예약된 슬롯에서 실제 로드 수행
    async fn activate(
        &self,
        reservation: &mut LoadReservation,
        descriptor: &PluginDescriptor,
        origin: PathBuf,
    ) -> Result<Arc<Plugin>> {
        let name = reservation.name.clone();
        let ticket = reservation.ticket;

        self.check_dependencies(&descriptor.metadata)?;

        let permissions = self.security.resolve_permissions(&name);
        let sandbox = SandboxDescriptor::build(&name, permissions.clone())?;
        let configuration = self.config_source.collect(self.env.as_ref(), &name);
        let ctx = PluginContext::new(&name, configuration.clone(), sandbox.clone());

        let instance = self.discovery.load(descriptor, &ctx).await?;

        match tokio::time::timeout(self.init_timeout, instance.initialize(&ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::initialization(&name, e.to_string())),
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "plugin {} did not initialize within {:?}",
                    name, self.init_timeout
                )))
            }
        }
        reservation.instance = Some(Arc::clone(&instance));

        let scan_warnings = scan_source(&descriptor.source);
        for warning in &scan_warnings {
            warn!("Plugin {}: {}", name, warning);
        }

        let plugin = Arc::new(Plugin {
            name: name.clone(),
            metadata: descriptor.metadata.clone(),
            permissions,
            configuration,
            origin,
            unit: Arc::clone(&instance),
            instance_id: Uuid::new_v4(),
            loaded_at: Utc::now(),
            scan_warnings,
            sandbox,
        });

        self.transition(&name, ticket, PluginStatus::Loaded, |slot| {
            slot.plugin = Some(Arc::clone(&plugin));
        })?;
        debug!("Plugin {} initialized", name);
        self.emit(
            LifecycleEvent::new(LifecycleEventKind::Loaded, &name)
                .with_status(PluginStatus::Loaded),
        )
        .await;

        // 호스트 등록과 ACTIVE 전환은 같은 락 안에서
        {
            let mut slots = self.slots.write();
            let slot = slots
                .owned_mut(&name, ticket)
                .ok_or_else(|| evicted_while_loading(&name))?;
            let tool = PluginTool::new(
                &name,
                descriptor.metadata.description.clone(),
                Arc::clone(&instance),
            );
            self.host.register(&name, Arc::new(tool))?;
            slot.status = PluginStatus::Active;
        }

        Ok(plugin)
    }

    /// 티켓을 확인하며 상태 전이
    fn transition(
        &self,
        name: &str,
        ticket: u64,
        next: PluginStatus,
        update: impl FnOnce(&mut Slot),
    ) -> Result<()> {
        let mut slots = self.slots.write();
        let slot = slots
            .owned_mut(name, ticket)
            .ok_or_else(|| evicted_while_loading(name))?;

        if !slot.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                name: name.to_string(),
                from: slot.status.to_string(),
                to: next.to_string(),
            });
        }

        slot.status = next;
        update(slot);
        Ok(())
    }

    fn mark_error(&self, name: &str, ticket: u64) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.owned_mut(name, ticket) {
            if slot.status.can_transition_to(PluginStatus::Error) {
                slot.status = PluginStatus::Error;
            }
        }
    }

    fn check_dependencies(&self, metadata: &PluginMetadata) -> Result<()> {
        let missing: Vec<String> = {
            let slots = self.slots.read();
            let active = slots.active_names();
            metadata
                .dependency_names()
                .into_iter()
                .filter(|dep| !active.contains(dep))
                .map(str::to_string)
                .collect()
        };

        if missing.is_empty() {
            return Ok(());
        }

        if self.require_dependencies {
            return Err(Error::MissingDependencies {
                name: metadata.name.clone(),
                missing,
            });
        }

        warn!(
            "Plugin {} has missing dependencies: {}",
            metadata.name,
            missing.join(", ")
        );
        Ok(())
    }

    /// 단일 경로 로드 (스캔 주기 밖)
    ///
    /// 파일이든 디렉토리든 엔트리 포인트는 유닛을 열기 전에 검증됩니다.
    pub async fn load_from_path(&self, path: impl AsRef<Path>) -> Result<Arc<Plugin>> {
        let path = path.as_ref();

        let descriptor = match self.discovery.describe_path(path).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                if let Error::SecurityRejected { reason, .. } = &e {
                    self.emit_rejection(path, reason).await;
                }
                return Err(e);
            }
        };
        self.load_and_register(descriptor).await
    }

    async fn emit_rejection(&self, path: &Path, reason: &str) {
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.emit(
            LifecycleEvent::new(LifecycleEventKind::SecurityRejected, label)
                .with_message(reason),
        )
        .await;
    }

    // ========================================================================
    // 언로드 / 리로드
    // ========================================================================

    /// 플러그인 언로드 (cleanup 실패는 보고만)
    pub async fn unload(&self, name: &str) -> Result<UnloadReport> {
        let (plugin, ticket) = {
            let mut slots = self.slots.write();
            let ticket = slots.issue_ticket();
            let slot = slots
                .entries
                .get_mut(name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;

            let plugin = match (&slot.status, &slot.plugin) {
                (PluginStatus::Active, Some(plugin)) => Arc::clone(plugin),
                (status, _) => {
                    return Err(Error::Busy {
                        name: name.to_string(),
                        status: status.to_string(),
                    })
                }
            };

            slot.status = PluginStatus::Unloading;
            slot.ticket = ticket;
            (plugin, ticket)
        };

        let mut guard = UnloadGuard {
            slots: Arc::clone(&self.slots),
            host: Arc::clone(&self.host),
            name: name.to_string(),
            ticket,
            finished: false,
        };

        info!("Unloading plugin: {}", name);
        self.emit(
            LifecycleEvent::new(LifecycleEventKind::Unloading, name)
                .with_status(PluginStatus::Unloading),
        )
        .await;

        let cleanup_error = match cleanup_with_timeout(plugin.unit.as_ref(), self.cleanup_timeout)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                warn!("Cleanup of plugin {} failed: {}", name, e);
                Some(e.to_string())
            }
        };

        if !guard.finish() {
            debug!("Plugin {} was evicted by shutdown during unload", name);
        }

        let mut event = LifecycleEvent::new(LifecycleEventKind::Unloaded, name)
            .with_status(PluginStatus::Unloaded);
        if let Some(message) = &cleanup_error {
            event = event.with_message(message.clone());
        }
        self.emit(event).await;
        info!("Unloaded plugin: {}", name);

        Ok(UnloadReport {
            name: name.to_string(),
            cleanup_error,
        })
    }

    /// 언로드 후 저장된 설명자로 다시 로드 (권한/설정 재해석)
    pub async fn reload(&self, name: &str) -> Result<Arc<Plugin>> {
        let descriptor = self
            .slots
            .read()
            .entries
            .get(name)
            .map(|slot| slot.descriptor.clone())
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        self.unload(name).await?;
        self.load_and_register(descriptor).await
    }

    // ========================================================================
    // 일괄 처리
    // ========================================================================

    /// 발견된 모든 플러그인 로드 (순차)
    pub async fn initialize_plugins(&self) -> Result<InitializationSummary> {
        let report = self.discovery.discover_all().await?;
        let mut summary = InitializationSummary {
            discovered: report.descriptors.len(),
            ..Default::default()
        };

        for failure in report.errors {
            if let Error::SecurityRejected { reason, .. } = &failure.error {
                self.emit_rejection(&failure.path, reason).await;
            }
            summary.errors.push(PluginFailure::new(
                failure.path.display().to_string(),
                failure.error,
            ));
        }

        for descriptor in report.descriptors {
            let name = descriptor.metadata.name.clone();
            match self.load_and_register(descriptor).await {
                Ok(_) => summary.loaded += 1,
                Err(e) => {
                    summary.failed += 1;
                    summary.errors.push(PluginFailure::new(name, e));
                }
            }
        }

        info!(
            "Plugin initialization: {} discovered, {} loaded, {} failed",
            summary.discovered, summary.loaded, summary.failed
        );
        Ok(summary)
    }

    /// 모든 플러그인 종료 (등록 역순, 실패해도 계속)
    ///
    /// 정리를 기다리는 동안 새로 예약된 슬롯도 맵이 빌 때까지 비웁니다.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        loop {
            let drained = self.drain_slots();
            if drained.is_empty() {
                break;
            }

            for (name, slot) in drained {
                let plugin = match (slot.status, slot.plugin) {
                    (PluginStatus::Active, Some(plugin)) => plugin,
                    (status, _) => {
                        debug!("Evicting plugin {} in status {}", name, status);
                        self.emit(
                            LifecycleEvent::new(LifecycleEventKind::Evicted, &name)
                                .with_message(format!("evicted while {}", status)),
                        )
                        .await;
                        report.evicted.push(name);
                        continue;
                    }
                };

                report.total += 1;
                match cleanup_with_timeout(plugin.unit.as_ref(), self.cleanup_timeout).await {
                    Ok(()) => report.succeeded += 1,
                    Err(e) => {
                        warn!("Cleanup of plugin {} failed during shutdown: {}", name, e);
                        report.failed += 1;
                        report.errors.push(PluginFailure::new(&name, &e));
                    }
                }

                self.emit(
                    LifecycleEvent::new(LifecycleEventKind::Unloaded, &name)
                        .with_status(PluginStatus::Unloaded),
                )
                .await;
            }
        }

        info!(
            "Plugin shutdown: {} total, {} succeeded, {} failed, {} evicted",
            report.total,
            report.succeeded,
            report.failed,
            report.evicted.len()
        );
        self.emit(
            LifecycleEvent::new(LifecycleEventKind::ShutdownCompleted, "").with_message(format!(
                "{} succeeded, {} failed",
                report.succeeded, report.failed
            )),
        )
        .await;

        report
    }

    /// 슬롯 전체를 꺼냄 (등록 역순). ACTIVE/UNLOADING 은 같은 락 안에서 등록 해제.
    fn drain_slots(&self) -> Vec<(String, Slot)> {
        let mut slots = self.slots.write();
        let mut drained: Vec<_> = slots.entries.drain().collect();
        drained.sort_by(|a, b| b.1.order.cmp(&a.1.order));
        for (name, slot) in &drained {
            if matches!(slot.status, PluginStatus::Active | PluginStatus::Unloading) {
                self.host.unregister(name);
            }
        }
        drained
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.slots.read().entries.get(name).map(|slot| slot.status)
    }

    /// 모든 슬롯 상태 (등록 순서)
    pub fn all_statuses(&self) -> Vec<PluginStatusReport> {
        let slots = self.slots.read();
        let mut entries: Vec<_> = slots.entries.iter().collect();
        entries.sort_by_key(|(_, slot)| slot.order);
        entries
            .into_iter()
            .map(|(name, slot)| PluginStatusReport {
                name: name.clone(),
                status: slot.status,
                version: slot.descriptor.metadata.version.clone(),
            })
            .collect()
    }

    /// ACTIVE 플러그인 조회
    pub fn get(&self, name: &str) -> Option<Arc<Plugin>> {
        self.slots
            .read()
            .entries
            .get(name)
            .filter(|slot| slot.status == PluginStatus::Active)
            .and_then(|slot| slot.plugin.clone())
    }

    /// ACTIVE 플러그인 목록 (등록 순서)
    pub fn plugins(&self) -> Vec<Arc<Plugin>> {
        let slots = self.slots.read();
        let mut active: Vec<_> = slots
            .entries
            .values()
            .filter(|slot| slot.status == PluginStatus::Active)
            .collect();
        active.sort_by_key(|slot| slot.order);
        active
            .into_iter()
            .filter_map(|slot| slot.plugin.clone())
            .collect()
    }

    /// 보안 리포트 (로드된 플러그인은 스냅샷 권한 + 스캔 경고)
    pub fn security_report(&self, name: &str) -> SecurityReport {
        match self.get(name) {
            Some(plugin) => {
                let mut report = SecurityReport::from_permissions(name, &plugin.permissions);
                report.scan_warnings = plugin.scan_warnings.clone();
                report
            }
            None => self.security.security_report(name),
        }
    }

    /// 샌드박스 설명자 (로드된 플러그인은 넘겨준 것과 같은 설명자)
    pub fn sandbox_descriptor(&self, name: &str) -> Result<SandboxDescriptor> {
        match self.get(name) {
            Some(plugin) => Ok(plugin.sandbox.clone()),
            None => self.security.sandbox_descriptor(name),
        }
    }
}

fn evicted_while_loading(name: &str) -> Error {
    Error::Plugin(format!("plugin {} was evicted while loading", name))
}
