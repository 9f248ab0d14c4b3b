//! Plugin Events - 라이프사이클 이벤트 시스템

use super::metadata::PluginStatus;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

// ============================================================================
// LifecycleEvent - 라이프사이클 이벤트
// ============================================================================

/// 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// 보안 검증 거부 (엔티티 생성 전)
    SecurityRejected,
    /// 이름 예약 완료, 로드 시작
    Loading,
    /// 초기화 완료
    Loaded,
    /// 호스트 레지스트리 등록 완료
    Activated,
    /// 로드 실패
    LoadFailed,
    Unloading,
    Unloaded,
    /// 로드 도중 shutdown 으로 제거됨
    Evicted,
    /// shutdown_all 완료
    ShutdownCompleted,
}

/// 라이프사이클 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,

    /// 플러그인 이름 (shutdown 완료 이벤트는 빈 문자열)
    pub plugin: String,

    /// 이벤트 이후 상태
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PluginStatus>,

    /// 에러/부가 메시지
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind, plugin: impl Into<String>) -> Self {
        Self {
            kind,
            plugin: plugin.into(),
            status: None,
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_status(mut self, status: PluginStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ============================================================================
// EventBus - 이벤트 버스 (발행/구독)
// ============================================================================

/// 이벤트 버스 - 브로드캐스트 + 최근 이벤트 히스토리
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,

    /// 이벤트 히스토리 (최근 N개)
    history: RwLock<VecDeque<LifecycleEvent>>,

    history_size: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256, 100)
    }

    /// 용량 지정하여 생성
    pub fn with_capacity(channel_capacity: usize, history_size: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            sender,
            history: RwLock::new(VecDeque::with_capacity(history_size)),
            history_size,
        }
    }

    /// 이벤트 발행
    pub async fn publish(&self, event: LifecycleEvent) {
        debug!("Publishing event: {:?} for {}", event.kind, event.plugin);

        {
            let mut history = self.history.write().await;
            if history.len() >= self.history_size {
                history.pop_front();
            }
            if self.history_size > 0 {
                history.push_back(event.clone());
            }
        }

        // 구독자가 없어도 OK
        let _ = self.sender.send(event);
    }

    /// 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// 이벤트 히스토리 조회
    pub async fn history(&self) -> Vec<LifecycleEvent> {
        self.history.read().await.iter().cloned().collect()
    }

    /// 특정 플러그인의 이벤트 히스토리
    pub async fn history_for(&self, plugin: &str) -> Vec<LifecycleEvent> {
        self.history
            .read()
            .await
            .iter()
            .filter(|e| e.plugin == plugin)
            .cloned()
            .collect()
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_history_is_bounded() {
        let bus = EventBus::with_capacity(16, 2);
        for name in ["a", "b", "c"] {
            bus.publish(LifecycleEvent::new(LifecycleEventKind::Loading, name))
                .await;
        }

        let history = bus.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].plugin, "b");
        assert_eq!(bus.history_for("c").await.len(), 1);
    }

    #[tokio::test]
    async fn test_event_subscribe() {
        let bus = Arc::new(EventBus::new());
        let mut receiver = bus.subscribe();

        let publisher = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
            publisher
                .publish(
                    LifecycleEvent::new(LifecycleEventKind::Activated, "alpha")
                        .with_status(PluginStatus::Active),
                )
                .await;
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind, LifecycleEventKind::Activated);
        assert_eq!(event.status, Some(PluginStatus::Active));
    }
}
