//! Process loader - 별도 프로세스 플러그인 (JSON-RPC 2.0 over stdio)
//!
//! 유닛 파일은 확장자별 인터프리터로 실행됩니다 (`sh`, `py` → python3, `js` → node).
//! 프로토콜 메서드:
//! - `describe` → `{"exports": [{"type_name", "name", "version", "description", "operations"}]}`
//! - `get_schema`, `initialize`, `execute`, `cleanup` → 각 계약 연산
//!
//! 자식 프로세스는 ENVIRONMENT_VARS 권한이 없으면 `PATH` 만 남긴 환경으로 실행되고,
//! 샌드박스 디렉토리가 있으면 그곳을 작업 디렉토리로 사용합니다.

use super::{ContractOp, DeclaredMetadata, LoadableUnit, UnitExport, UnitFactory, UnitLoader};
use crate::plugin::traits::{PluginContext, PluginUnit};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use toolrack_foundation::permission::Permission;
use toolrack_foundation::{Error, Result};
use tracing::{debug, error, info, warn};

/// 기본 요청 타임아웃
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// JSON-RPC 2.0 메시지
// ============================================================================

/// JSON-RPC 2.0 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 에러
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// RpcChannel - 자식 프로세스와의 요청/응답 채널
// ============================================================================

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// 자식 프로세스 실행 옵션
struct SpawnOptions<'a> {
    program: &'a str,
    entry: &'a Path,
    inherit_env: bool,
    working_dir: &'a Path,
    plugin: &'a str,
}

struct RpcChannel {
    label: String,
    request_id: AtomicU64,
    child: tokio::sync::Mutex<Option<Child>>,
    stdin_tx: mpsc::Sender<String>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    timeout: Duration,
}

impl RpcChannel {
    /// 프로세스 시작 및 reader/writer 태스크 연결
    fn spawn(options: SpawnOptions<'_>, timeout: Duration) -> Result<Self> {
        let label = format!("{}:{}", options.plugin, options.entry.display());
        debug!("Spawning plugin process: {} {:?}", options.program, options.entry);

        let mut cmd = Command::new(options.program);
        cmd.arg(options.entry)
            .current_dir(options.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !options.inherit_env {
            cmd.env_clear();
            if let Some(path) = std::env::var_os("PATH") {
                cmd.env("PATH", path);
            }
        }
        cmd.env("TOOLRACK_PLUGIN_NAME", options.plugin);

        let mut child = cmd.spawn().map_err(|e| {
            Error::Transport(format!(
                "Failed to spawn plugin process '{}': {}",
                options.program, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("Failed to capture stdout".to_string()))?;
        let stderr = child.stderr.take();

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        // stdin writer task
        let connected_for_writer = Arc::clone(&connected);
        let mut writer = stdin;
        tokio::spawn(async move {
            while let Some(msg) = stdin_rx.recv().await {
                let written = match writer.write_all(msg.as_bytes()).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    error!("Failed to write to plugin stdin: {}", e);
                    connected_for_writer.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        // stdout reader task
        let pending_for_reader = Arc::clone(&pending);
        let connected_for_reader = Arc::clone(&connected);
        let reader_label = label.clone();
        let mut lines = BufReader::new(stdout).lines();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) => {
                        if let Some(id) = response.id {
                            if let Some(sender) = pending_for_reader.lock().remove(&id) {
                                let _ = sender.send(response);
                            }
                        }
                    }
                    Err(e) => debug!("Non-JSON-RPC line from {}: {}", reader_label, e),
                }
            }
            connected_for_reader.store(false, Ordering::SeqCst);
            // 대기 중인 요청은 즉시 실패
            pending_for_reader.lock().clear();
            debug!("Plugin stdout closed: {}", reader_label);
        });

        // stderr는 로그로만 전달
        if let Some(stderr) = stderr {
            let stderr_label = label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("Plugin stderr [{}]: {}", stderr_label, line);
                }
            });
        }

        Ok(Self {
            label,
            request_id: AtomicU64::new(1),
            child: tokio::sync::Mutex::new(Some(child)),
            stdin_tx,
            pending,
            connected,
            timeout,
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// 요청 전송 및 응답 대기
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::Transport(format!(
                "Plugin process {} is not connected",
                self.label
            )));
        }

        let id = self.next_id();
        let request = JsonRpcRequest::new(id, method, Some(params));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let msg = serde_json::to_string(&request)?;
        debug!("Sending plugin request [{}]: {}", self.label, method);

        if let Err(e) = self.stdin_tx.send(format!("{}\n", msg)).await {
            self.pending.lock().remove(&id);
            return Err(Error::Transport(format!("Failed to send request: {}", e)));
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(Error::Transport(format!(
                    "Plugin process {} closed before answering {}",
                    self.label, method
                )))
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(Error::Timeout(format!(
                    "Plugin request {} to {} timed out",
                    method, self.label
                )));
            }
        };

        if let Some(error) = response.error {
            return Err(Error::Plugin(format!(
                "{} returned error {}: {}",
                method, error.code, error.message
            )));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// 프로세스 종료
    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!("Plugin process {} already exited: {}", self.label, e);
            }
        }
    }
}

// ============================================================================
// ProcessUnit - 별도 프로세스 플러그인 인스턴스
// ============================================================================

/// 별도 프로세스에서 동작하는 플러그인 인스턴스
pub struct ProcessUnit {
    type_name: String,
    channel: RpcChannel,
    schema: Value,
}

impl ProcessUnit {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

#[async_trait]
impl PluginUnit for ProcessUnit {
    async fn initialize(&self, ctx: &PluginContext) -> Result<()> {
        let params = json!({
            "type": self.type_name,
            "name": ctx.name(),
            "config": ctx.configuration(),
            "permissions": ctx.permissions().to_map(),
            "working_dir": ctx.working_dir(),
        });
        self.channel.request("initialize", params).await?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let result = self
            .channel
            .request("cleanup", json!({ "type": self.type_name }))
            .await;
        self.channel.close().await;
        result.map(|_| ())
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        self.channel
            .request("execute", json!({ "type": self.type_name, "params": params }))
            .await
    }

    fn schema(&self) -> Value {
        self.schema.clone()
    }
}

struct ProcessFactory {
    program: String,
    entry: PathBuf,
    type_name: String,
    timeout: Duration,
}

#[async_trait]
impl UnitFactory for ProcessFactory {
    async fn instantiate(&self, ctx: &PluginContext) -> Result<Arc<dyn PluginUnit>> {
        let fallback_dir = self.entry.parent().unwrap_or_else(|| Path::new("."));
        let channel = RpcChannel::spawn(
            SpawnOptions {
                program: &self.program,
                entry: &self.entry,
                inherit_env: ctx.allows(Permission::EnvironmentVars),
                working_dir: ctx.working_dir().unwrap_or(fallback_dir),
                plugin: ctx.name(),
            },
            self.timeout,
        )?;

        let schema = match channel
            .request("get_schema", json!({ "type": self.type_name }))
            .await
        {
            Ok(schema) => schema,
            Err(e) => {
                channel.close().await;
                return Err(e);
            }
        };

        info!("Started plugin process for {} ({})", ctx.name(), self.type_name);
        Ok(Arc::new(ProcessUnit {
            type_name: self.type_name.clone(),
            channel,
            schema,
        }))
    }
}

// ============================================================================
// ProcessLoader
// ============================================================================

#[derive(Debug, Deserialize)]
struct DescribeResult {
    #[serde(default)]
    exports: Vec<DescribedExport>,
}

#[derive(Debug, Deserialize)]
struct DescribedExport {
    #[serde(alias = "type")]
    type_name: String,
    #[serde(flatten)]
    declared: DeclaredMetadata,
    #[serde(default)]
    operations: Vec<String>,
}

/// 별도 프로세스 유닛 로더
pub struct ProcessLoader {
    interpreters: HashMap<&'static str, String>,
    timeout: Duration,
}

impl ProcessLoader {
    const EXTENSIONS: [&'static str; 3] = ["sh", "py", "js"];

    pub fn new() -> Self {
        let interpreters = HashMap::from([
            ("sh", "sh".to_string()),
            ("py", "python3".to_string()),
            ("js", "node".to_string()),
        ]);
        Self {
            interpreters,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// 확장자별 인터프리터 변경 (지원 확장자만)
    pub fn with_interpreter(mut self, extension: &str, program: impl Into<String>) -> Self {
        if let Some(ext) = Self::EXTENSIONS.iter().find(|e| **e == extension) {
            self.interpreters.insert(*ext, program.into());
        } else {
            warn!("Ignoring interpreter for unsupported extension: {}", extension);
        }
        self
    }

    /// 요청 타임아웃
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn interpreter_for(&self, entry: &Path) -> Result<&str> {
        entry
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|ext| self.interpreters.get(ext.to_ascii_lowercase().as_str()))
            .map(String::as_str)
            .ok_or_else(|| Error::UnsupportedUnit(entry.to_path_buf()))
    }
}

impl Default for ProcessLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_operation(name: &str) -> Option<ContractOp> {
    serde_json::from_value(Value::String(name.to_string())).ok()
}

#[async_trait]
impl UnitLoader for ProcessLoader {
    fn name(&self) -> &str {
        "process"
    }

    fn extensions(&self) -> &[&'static str] {
        &Self::EXTENSIONS
    }

    async fn open(&self, entry: &Path) -> Result<LoadableUnit> {
        let program = self.interpreter_for(entry)?.to_string();
        let source = tokio::fs::read_to_string(entry).await?;
        let working_dir = entry.parent().unwrap_or_else(|| Path::new("."));

        // describe 는 최소 환경으로 실행
        let channel = RpcChannel::spawn(
            SpawnOptions {
                program: &program,
                entry,
                inherit_env: false,
                working_dir,
                plugin: "<describe>",
            },
            self.timeout,
        )?;
        let described = channel.request("describe", json!({})).await;
        channel.close().await;

        let described: DescribeResult = serde_json::from_value(described?)
            .map_err(|e| Error::metadata(entry, format!("invalid describe result: {}", e)))?;

        let exports = described
            .exports
            .into_iter()
            .map(|export| {
                let operations: Vec<ContractOp> = export
                    .operations
                    .iter()
                    .filter_map(|op| parse_operation(op))
                    .collect();
                let factory = Arc::new(ProcessFactory {
                    program: program.clone(),
                    entry: entry.to_path_buf(),
                    type_name: export.type_name.clone(),
                    timeout: self.timeout,
                });
                UnitExport::new(export.type_name, operations, factory).with_declared(export.declared)
            })
            .collect();

        Ok(LoadableUnit {
            entry: entry.to_path_buf(),
            source,
            exports,
        })
    }
}
