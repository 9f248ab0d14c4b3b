//! 플러그인 호스트 통합 테스트
//!
//! 발견 → 보안 검증 → 라이프사이클 → 호스트 레지스트리 전체 흐름

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use toolrack_core::plugin::{
    Capability, CapabilityRegistry, InMemoryCapabilityRegistry, LifecycleEventKind,
    LifecycleRegistry, NativeLoader, PluginContext, PluginDiscovery, PluginSecurity, PluginStatus,
    PluginUnit, UnitExport, UnitLoader,
};
use toolrack_foundation::{Error, MapEnv, Permission, PluginSystemConfig, Result};

// ============================================================================
// Fixtures
// ============================================================================

type Journal = Arc<Mutex<Vec<String>>>;

struct Recorder {
    name: &'static str,
    init_delay: Duration,
    fail_cleanup: bool,
    journal: Journal,
}

#[async_trait]
impl PluginUnit for Recorder {
    async fn initialize(&self, _ctx: &PluginContext) -> Result<()> {
        tokio::time::sleep(self.init_delay).await;
        self.journal.lock().push(format!("init:{}", self.name));
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.journal.lock().push(format!("cleanup:{}", self.name));
        if self.fail_cleanup {
            return Err(Error::Plugin(format!("{} refused to stop", self.name)));
        }
        Ok(())
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        Ok(json!({ "plugin": self.name, "params": params }))
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
}

fn recorder(
    name: &'static str,
    init_delay: Duration,
    fail_cleanup: bool,
    journal: &Journal,
) -> UnitExport {
    let journal = Arc::clone(journal);
    UnitExport::plugin(format!("{}Plugin", name), move || {
        Arc::new(Recorder {
            name,
            init_delay,
            fail_cleanup,
            journal: Arc::clone(&journal),
        }) as Arc<dyn PluginUnit>
    })
}

fn native_loader(journal: &Journal) -> NativeLoader {
    NativeLoader::new()
        .with_module("alpha", vec![recorder("alpha", Duration::ZERO, false, journal)])
        .with_module("beta", vec![recorder("beta", Duration::ZERO, false, journal)])
        .with_module("gamma", vec![recorder("gamma", Duration::ZERO, true, journal)])
        .with_module(
            "slow",
            vec![recorder("slow", Duration::from_millis(100), false, journal)],
        )
        .with_module(
            "dup",
            vec![
                recorder("first", Duration::ZERO, false, journal),
                recorder("second", Duration::ZERO, false, journal),
            ],
        )
}

fn write_unit(path: &Path, module: &str) {
    std::fs::write(path, format!("module = \"{}\"\n", module)).unwrap();
}

fn registry_for(
    config: &PluginSystemConfig,
    loaders: Vec<Arc<dyn UnitLoader>>,
    env: MapEnv,
) -> (LifecycleRegistry, Arc<InMemoryCapabilityRegistry>) {
    let host = Arc::new(InMemoryCapabilityRegistry::new());
    let registry = LifecycleRegistry::from_config(
        config,
        loaders,
        Arc::clone(&host) as Arc<dyn CapabilityRegistry>,
        Arc::new(env),
    )
    .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
    (registry, host)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn two_directories_are_discovered_and_activated() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    write_unit(&first.path().join("alpha.toml"), "alpha");

    let beta = second.path().join("beta");
    std::fs::create_dir(&beta).unwrap();
    write_unit(&beta.join("plugin.toml"), "beta");
    std::fs::write(
        beta.join("plugin.json"),
        r#"{
            // shipped with the plugin
            "name": "beta",
            "version": "2.3.1",
            "tags": ["experimental"]
        }"#,
    )
    .unwrap();

    let config = PluginSystemConfig::default()
        .with_directory(first.path())
        .with_directory(second.path());
    let journal = Journal::default();
    let (registry, host) = registry_for(
        &config,
        vec![Arc::new(native_loader(&journal))],
        MapEnv::new(),
    );

    let summary = registry.initialize_plugins().await.unwrap();
    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.loaded, 2);
    assert_eq!(summary.failed, 0);

    let alpha = registry.get("alpha").unwrap();
    assert_eq!(alpha.metadata().version, "1.0.0");

    let beta = registry.get("beta").unwrap();
    assert_eq!(beta.metadata().version, "2.3.1");
    assert!(beta.metadata().tags.contains("experimental"));

    assert_eq!(host.names(), vec!["alpha".to_string(), "beta".to_string()]);
    let statuses: Vec<_> = registry
        .all_statuses()
        .into_iter()
        .map(|s| (s.name, s.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("alpha".to_string(), PluginStatus::Active),
            ("beta".to_string(), PluginStatus::Active)
        ]
    );
}

#[tokio::test]
async fn ambiguous_entry_point_is_isolated_from_siblings() {
    let root = TempDir::new().unwrap();
    write_unit(&root.path().join("alpha.toml"), "alpha");
    write_unit(&root.path().join("beta.toml"), "beta");
    let dup = root.path().join("dup");
    std::fs::create_dir(&dup).unwrap();
    write_unit(&dup.join("main.toml"), "dup");

    let journal = Journal::default();
    let discovery = PluginDiscovery::new(vec![Arc::new(native_loader(&journal))]);
    assert!(discovery.add_directory(root.path()));

    let report = discovery.discover_all().await.unwrap();
    assert_eq!(report.names(), vec!["alpha", "beta"]);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].path.ends_with("dup"));
    match &report.errors[0].error {
        Error::AmbiguousEntryPoint { candidates, .. } => {
            assert_eq!(
                candidates,
                &vec!["firstPlugin".to_string(), "secondPlugin".to_string()]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn concurrent_loads_of_one_name_admit_exactly_one() {
    let root = TempDir::new().unwrap();
    write_unit(&root.path().join("slow.toml"), "slow");

    let config = PluginSystemConfig::default().with_directory(root.path());
    let journal = Journal::default();
    let (registry, host) = registry_for(
        &config,
        vec![Arc::new(native_loader(&journal))],
        MapEnv::new(),
    );

    let descriptor = registry
        .discovery()
        .describe_path(root.path().join("slow.toml"))
        .await
        .unwrap();

    let attempts = (0..8).map(|_| registry.load_and_register(descriptor.clone()));
    let results = join_all(attempts).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    for err in results.into_iter().filter_map(|r| r.err()) {
        assert!(
            matches!(err, Error::Busy { .. } | Error::AlreadyLoaded(_)),
            "unexpected error: {err}"
        );
    }

    assert_eq!(host.len(), 1);
    assert_eq!(registry.status("slow"), Some(PluginStatus::Active));
    assert_eq!(journal.lock().as_slice(), &["init:slow".to_string()]);
}

#[tokio::test]
async fn reload_cycle_applies_new_overrides() {
    let root = TempDir::new().unwrap();
    let entry = root.path().join("alpha.toml");
    write_unit(&entry, "alpha");

    let config = PluginSystemConfig::default().with_directory(root.path());
    let env = MapEnv::new()
        .with("PLUGIN_SECURITY_ALPHA_NETWORK_ACCESS", "yes")
        .with("PLUGIN_ALPHA_REGION", "eu-west");
    let journal = Journal::default();
    let (registry, host) = registry_for(&config, vec![Arc::new(native_loader(&journal))], env);

    let first = registry.load_from_path(&entry).await.unwrap();
    assert!(first.permissions().allows(Permission::NetworkAccess));
    assert!(!first.permissions().allows(Permission::WriteFiles));
    assert!(first.sandbox().working_dir().is_none());
    assert_eq!(first.configuration().get("region").map(String::as_str), Some("eu-west"));

    registry.security().grant("alpha", Permission::WriteFiles);
    assert!(!registry
        .get("alpha")
        .unwrap()
        .permissions()
        .allows(Permission::WriteFiles));

    let report = registry.unload("alpha").await.unwrap();
    assert!(report.cleanup_error.is_none());
    assert!(host.lookup("alpha").is_none());
    assert_eq!(registry.status("alpha"), None);

    let second = registry.load_from_path(&entry).await.unwrap();
    assert_ne!(second.instance_id(), first.instance_id());
    assert!(second.permissions().allows(Permission::WriteFiles));
    assert!(second.permissions().allows(Permission::NetworkAccess));
    assert!(second.sandbox().working_dir().unwrap().is_dir());
    assert_eq!(registry.status("alpha"), Some(PluginStatus::Active));
    assert!(host.lookup("alpha").is_some());

    assert_eq!(
        journal.lock().as_slice(),
        &[
            "init:alpha".to_string(),
            "cleanup:alpha".to_string(),
            "init:alpha".to_string()
        ]
    );
}

#[tokio::test]
async fn descriptor_outside_allow_list_never_reaches_loading() {
    let allowed = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    write_unit(&outside.path().join("alpha.toml"), "alpha");

    let journal = Journal::default();
    let loader: Arc<dyn UnitLoader> = Arc::new(native_loader(&journal));

    let discovery = PluginDiscovery::new(vec![Arc::clone(&loader)]);
    discovery.add_directory(outside.path());
    let report = discovery.discover_all().await.unwrap();
    let descriptor = report.descriptors.into_iter().next().unwrap();

    let host = Arc::new(InMemoryCapabilityRegistry::new());
    let registry = LifecycleRegistry::new(
        Arc::new(PluginDiscovery::new(vec![loader])),
        Arc::new(PluginSecurity::new([allowed.path()])),
        Arc::clone(&host) as Arc<dyn CapabilityRegistry>,
    );

    let err = registry.load_and_register(descriptor).await.unwrap_err();
    assert!(matches!(err, Error::SecurityRejected { .. }));
    assert_eq!(registry.status("alpha"), None);
    assert!(host.is_empty());
    assert!(journal.lock().is_empty());

    let kinds: Vec<_> = registry
        .events()
        .history()
        .await
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![LifecycleEventKind::SecurityRejected]);
}

#[tokio::test]
async fn shutdown_continues_past_a_failing_cleanup() {
    let root = TempDir::new().unwrap();
    for name in ["alpha", "gamma", "beta"] {
        write_unit(&root.path().join(format!("{}.toml", name)), name);
    }

    let config = PluginSystemConfig::default().with_directory(root.path());
    let journal = Journal::default();
    let (registry, host) = registry_for(
        &config,
        vec![Arc::new(native_loader(&journal))],
        MapEnv::new(),
    );

    let summary = registry.initialize_plugins().await.unwrap();
    assert_eq!(summary.loaded, 3);
    journal.lock().clear();

    let report = registry.shutdown_all().await;
    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].name, "gamma");
    assert!(report.errors[0].message.contains("refused to stop"));

    // 등록 역순 (alpha, beta, gamma 순으로 로드됨)
    assert_eq!(
        journal.lock().as_slice(),
        &[
            "cleanup:gamma".to_string(),
            "cleanup:beta".to_string(),
            "cleanup:alpha".to_string()
        ]
    );

    assert!(registry.all_statuses().is_empty());
    assert!(host.is_empty());

    let again = registry.shutdown_all().await;
    assert_eq!(again.total, 0);
    assert_eq!(again.failed, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn process_unit_end_to_end() {
    use toolrack_core::plugin::ProcessLoader;

    const SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"describe"'*) result='{"exports":[{"type_name":"Upper","name":"upper","version":"0.3.0","operations":["initialize","cleanup","execute","get_schema"]}]}' ;;
    *'"method":"get_schema"'*) result='{"type":"object","required":["text"]}' ;;
    *'"method":"execute"'*) result='{"text":"HI"}' ;;
    *) result='null' ;;
  esac
  printf '{"jsonrpc":"2.0","id":%s,"result":%s}\n' "$id" "$result"
done
"#;

    let root = TempDir::new().unwrap();
    std::fs::write(root.path().join("upper.sh"), SCRIPT).unwrap();

    let config = PluginSystemConfig::default().with_directory(root.path());
    let loader = ProcessLoader::new().with_timeout(Duration::from_secs(10));
    let (registry, host) = registry_for(&config, vec![Arc::new(loader)], MapEnv::new());

    let summary = registry.initialize_plugins().await.unwrap();
    assert_eq!(summary.loaded, 1, "errors: {:?}", summary.errors);

    let plugin = registry.get("upper").unwrap();
    assert_eq!(plugin.metadata().version, "0.3.0");

    let tool = host.lookup("upper").unwrap();
    let output = tool.call(json!({ "text": "hi" })).await.unwrap();
    assert_eq!(output["text"], "HI");

    let err = tool.call(json!({})).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let report = registry.unload("upper").await.unwrap();
    assert!(report.cleanup_error.is_none());
    assert!(host.is_empty());
}

#[cfg(unix)]
fn marker_script(marker: &Path) -> String {
    format!("#!/bin/sh\ntouch '{}'\n", marker.display())
}

#[cfg(unix)]
#[tokio::test]
async fn rejected_directory_plugin_is_never_executed() {
    use toolrack_core::plugin::ProcessLoader;

    let allowed = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let marker = outside.path().join("executed");

    let evil = outside.path().join("evil");
    std::fs::create_dir(&evil).unwrap();
    std::fs::write(evil.join("plugin.sh"), marker_script(&marker)).unwrap();

    let config = PluginSystemConfig::default().with_directory(allowed.path());
    let (registry, host) =
        registry_for(&config, vec![Arc::new(ProcessLoader::new())], MapEnv::new());

    let err = registry.load_from_path(&evil).await.unwrap_err();
    assert!(matches!(err, Error::SecurityRejected { .. }), "got {err}");
    assert!(!marker.exists());
    assert!(registry.all_statuses().is_empty());
    assert!(host.is_empty());

    let history = registry.events().history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, LifecycleEventKind::SecurityRejected);
    assert_eq!(history[0].plugin, "evil");
}

#[cfg(unix)]
#[tokio::test]
async fn world_writable_script_is_never_executed_during_discovery() {
    use std::os::unix::fs::PermissionsExt;
    use toolrack_core::plugin::ProcessLoader;

    let root = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let marker = scratch.path().join("executed");

    let script = root.path().join("ww.sh");
    std::fs::write(&script, marker_script(&marker)).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o666)).unwrap();

    let config = PluginSystemConfig::default().with_directory(root.path());
    let (registry, _host) =
        registry_for(&config, vec![Arc::new(ProcessLoader::new())], MapEnv::new());

    let summary = registry.initialize_plugins().await.unwrap();
    assert_eq!(summary.discovered, 0);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].message.contains("world-writable"));
    assert!(!marker.exists());

    let rejected = registry
        .events()
        .history()
        .await
        .into_iter()
        .filter(|e| e.kind == LifecycleEventKind::SecurityRejected)
        .count();
    assert_eq!(rejected, 1);
}
