//! 채널 추상화
//!
//! 코어가 채널에 요구하는 것은 네 가지뿐:
//! - 구조화된 메시지 송신
//! - 수신 이벤트 스트림 (open / message / close / error)
//! - 송신 버퍼 수위 조회 (아직 전송되지 않은 바이트)
//! - (선택) 수위 하락 알림
//!
//! 연결 수립, NAT 통과, 룸 코드 해석은 채널을 만드는 쪽의 책임

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::message::Message;
use crate::{Error, Result};

/// 원격 피어 식별자
pub type PeerId = u64;

/// 채널에서 올라오는 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Open,
    Message(Message),
    Close,
    Error(String),
}

/// 채널 이벤트 수신기 타입
pub type ChannelEvents = mpsc::Receiver<ChannelEvent>;

/// 순서 보장 + 신뢰성 있는 메시지 채널
pub trait Channel: Send + Sync {
    /// 이 채널 건너편 피어의 ID
    fn peer_id(&self) -> PeerId;

    /// 메시지 송신 (송신 버퍼에 적재)
    fn send(&self, message: &Message) -> Result<()>;

    /// 큐에 쌓였지만 아직 전송되지 않은 바이트 수
    fn buffered_amount(&self) -> usize;

    /// 수위 하락 알림. 없으면 백프레셔는 폴링만 사용
    fn buffered_amount_low(&self) -> Option<&Notify> {
        None
    }

    /// 채널 종료
    fn close(&self);
}

/// 메모리 링크 설정
#[derive(Debug, Clone)]
pub struct MemoryLink {
    /// 방향별 전송 속도 (bytes/sec). `None`이면 즉시 전달
    pub drain_rate: Option<u64>,

    /// 방향별 이벤트 큐 크기
    pub queue_size: usize,
}

impl Default for MemoryLink {
    fn default() -> Self {
        Self {
            drain_rate: None,
            queue_size: 1024,
        }
    }
}

/// 프로세스 내부 채널 (한쪽 끝)
///
/// 송신한 메시지는 바이트로 인코딩되어 펌프 태스크를 거쳐 상대편 이벤트 큐로 전달됨.
/// 펌프가 넘기기 전까지의 바이트가 `buffered_amount`
pub struct MemoryChannel {
    peer_id: PeerId,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    buffered: Arc<AtomicUsize>,
    low: Arc<Notify>,
    local_events: mpsc::Sender<ChannelEvent>,
}

/// 연결된 메모리 채널 한 쌍 생성
///
/// tokio 런타임 안에서 호출해야 함 (방향별 펌프 태스크 spawn)
pub fn memory_pair(
    link: MemoryLink,
) -> ((Arc<MemoryChannel>, ChannelEvents), (Arc<MemoryChannel>, ChannelEvents)) {
    let id_a: PeerId = rand::random();
    let id_b: PeerId = rand::random();

    let (events_a_tx, events_a_rx) = mpsc::channel(link.queue_size.max(2));
    let (events_b_tx, events_b_rx) = mpsc::channel(link.queue_size.max(2));

    let a = MemoryChannel::spawn(id_b, events_a_tx, events_b_tx.clone(), link.drain_rate);
    let b = MemoryChannel::spawn(id_a, events_b_tx, a.local_events.clone(), link.drain_rate);

    ((a, events_a_rx), (b, events_b_rx))
}

impl MemoryChannel {
    fn spawn(
        peer_id: PeerId,
        local_events: mpsc::Sender<ChannelEvent>,
        remote_events: mpsc::Sender<ChannelEvent>,
        drain_rate: Option<u64>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));
        let low = Arc::new(Notify::new());

        let _ = local_events.try_send(ChannelEvent::Open);
        tokio::spawn(pump(rx, remote_events, buffered.clone(), low.clone(), drain_rate));

        Arc::new(Self {
            peer_id,
            outbound: Mutex::new(Some(tx)),
            buffered,
            low,
            local_events,
        })
    }
}

impl Channel for MemoryChannel {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn send(&self, message: &Message) -> Result<()> {
        let frame = Bytes::from(message.to_bytes()?);
        let len = frame.len();

        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(Error::ChannelClosed)?;

        self.buffered.fetch_add(len, Ordering::SeqCst);
        if tx.send(frame).is_err() {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn buffered_amount_low(&self) -> Option<&Notify> {
        Some(&self.low)
    }

    fn close(&self) {
        // 송신 측을 닫으면 펌프가 남은 프레임을 넘긴 뒤 상대에게 Close 전달
        if self.outbound.lock().take().is_some() {
            let local = self.local_events.clone();
            tokio::spawn(async move {
                let _ = local.send(ChannelEvent::Close).await;
            });
        }
    }
}

/// 한 방향 전달 루프
async fn pump(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    remote: mpsc::Sender<ChannelEvent>,
    buffered: Arc<AtomicUsize>,
    low: Arc<Notify>,
    drain_rate: Option<u64>,
) {
    while let Some(frame) = rx.recv().await {
        if let Some(rate) = drain_rate.filter(|r| *r > 0) {
            tokio::time::sleep(Duration::from_secs_f64(frame.len() as f64 / rate as f64)).await;
        }

        let delivered = match Message::from_bytes(&frame) {
            Some(message) => remote.send(ChannelEvent::Message(message)).await.is_ok(),
            None => {
                debug!("깨진 프레임 폐기: {} bytes", frame.len());
                true
            }
        };

        buffered.fetch_sub(frame.len(), Ordering::SeqCst);
        low.notify_waiters();

        if !delivered {
            break;
        }
    }

    let _ = remote.send(ChannelEvent::Close).await;
}
