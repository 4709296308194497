//! 진행률 추적
//!
//! 송신측: (peer, 파일) → percent, 수신측: (연결, 파일) → percent
//! 한 전송 안에서 percent는 감소하지 않으며 완료 시 100과 `done` 이벤트가 정확히 한 번 나감

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::channel::PeerId;

/// 진행률 이벤트
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// 상대 피어 (송신측은 수신자, 수신측은 송신자)
    pub peer: PeerId,
    pub name: String,
    /// 0.0 ~ 100.0
    pub percent: f64,
    /// 완료 이벤트 여부
    pub done: bool,
}

/// 진행률 이벤트 송신기 타입
pub type ProgressTx = mpsc::UnboundedSender<Progress>;

/// 진행률 이벤트 수신기 타입
pub type ProgressRx = mpsc::UnboundedReceiver<Progress>;

/// 진행률 이벤트 채널 생성
pub fn progress_channel() -> (ProgressTx, ProgressRx) {
    mpsc::unbounded_channel()
}

/// 피어 하나의 진행률 기록 (파일 이름 → 마지막 percent)
///
/// 복제본끼리 같은 기록을 공유
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    peer: PeerId,
    record: Arc<Mutex<HashMap<String, f64>>>,
    observer: Option<ProgressTx>,
}

impl ProgressTracker {
    pub fn new(peer: PeerId, observer: Option<ProgressTx>) -> Self {
        Self {
            peer,
            record: Arc::new(Mutex::new(HashMap::new())),
            observer,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// 새 전송 시작 (같은 파일 재요청 시 0부터 다시)
    pub fn begin(&self, name: &str) {
        self.record.lock().insert(name.to_string(), 0.0);
    }

    /// 진행률 갱신 후 발행. 실제 기록된 값 반환
    pub fn update(&self, name: &str, percent: f64) -> f64 {
        let percent = {
            let mut record = self.record.lock();
            let entry = record.entry(name.to_string()).or_insert(0.0);
            *entry = percent.clamp(0.0, 100.0).max(*entry);
            *entry
        };
        self.publish(name, percent, false);
        percent
    }

    /// 완료: 100 기록 후 done 이벤트 발행
    pub fn complete(&self, name: &str) {
        self.record.lock().insert(name.to_string(), 100.0);
        self.publish(name, 100.0, true);
    }

    /// 파일 하나의 마지막 percent
    pub fn get(&self, name: &str) -> Option<f64> {
        self.record.lock().get(name).copied()
    }

    /// 전체 기록 복사본
    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.record.lock().clone()
    }

    fn publish(&self, name: &str, percent: f64, done: bool) {
        if let Some(observer) = &self.observer {
            // 관찰자가 없어져도 전송은 계속
            let _ = observer.send(Progress {
                peer: self.peer,
                name: name.to_string(),
                percent,
                done,
            });
        }
    }
}
