//! TCP 채널
//!
//! 프레임: u32 길이(big endian) + 메시지 바이트.
//! 쓰기 태스크로 넘어가 아직 소켓에 기록되지 않은 바이트가 `buffered_amount`

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent, ChannelEvents, PeerId};
use crate::message::Message;
use crate::{Config, Error, Result};

/// TCP 스트림 위의 채널
pub struct TcpChannel {
    peer_id: PeerId,
    remote_addr: SocketAddr,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    buffered: Arc<AtomicUsize>,
    low: Arc<Notify>,
    max_frame_size: usize,
    local_events: mpsc::Sender<ChannelEvent>,
}

impl TcpChannel {
    /// 원격 주소로 연결
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: &Config,
    ) -> Result<(Arc<Self>, ChannelEvents)> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream, config)
    }

    /// 리스너에서 연결 하나 수락
    pub async fn accept(
        listener: &TcpListener,
        config: &Config,
    ) -> Result<(Arc<Self>, ChannelEvents)> {
        let (stream, _) = listener.accept().await?;
        Self::from_stream(stream, config)
    }

    /// 이미 연결된 스트림으로 생성 (읽기/쓰기 태스크 spawn)
    pub fn from_stream(stream: TcpStream, config: &Config) -> Result<(Arc<Self>, ChannelEvents)> {
        let remote_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let (events_tx, events_rx) = mpsc::channel(config.event_queue_size.max(2));
        let (tx, rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));
        let low = Arc::new(Notify::new());

        let _ = events_tx.try_send(ChannelEvent::Open);
        tokio::spawn(write_loop(write_half, rx, buffered.clone(), low.clone(), events_tx.clone()));
        tokio::spawn(read_loop(read_half, config.max_frame_size, events_tx.clone()));

        let channel = Arc::new(Self {
            peer_id: rand::random(),
            remote_addr,
            outbound: Mutex::new(Some(tx)),
            buffered,
            low,
            max_frame_size: config.max_frame_size,
            local_events: events_tx,
        });
        info!(peer = channel.peer_id, "TCP 채널 연결: {}", remote_addr);

        Ok((channel, events_rx))
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl Channel for TcpChannel {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn send(&self, message: &Message) -> Result<()> {
        let frame = Bytes::from(message.to_bytes()?);
        let len = frame.len();
        if len > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                len,
                max: self.max_frame_size,
            });
        }

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
        // 쓰기 태스크가 남은 프레임을 보낸 뒤 소켓 쓰기 방향을 닫음
        if self.outbound.lock().take().is_some() {
            let local = self.local_events.clone();
            tokio::spawn(async move {
                let _ = local.send(ChannelEvent::Close).await;
            });
        }
    }
}

/// 쓰기 루프
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    buffered: Arc<AtomicUsize>,
    low: Arc<Notify>,
    events: mpsc::Sender<ChannelEvent>,
) {
    while let Some(frame) = rx.recv().await {
        let written = write_frame(&mut writer, &frame).await;

        buffered.fetch_sub(frame.len(), Ordering::SeqCst);
        low.notify_waiters();

        if let Err(e) = written {
            warn!("TCP 쓰기 실패: {}", e);
            let _ = events.send(ChannelEvent::Error(e.to_string())).await;
            return;
        }
    }

    let _ = writer.shutdown().await;
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &[u8]) -> std::io::Result<()> {
    writer.write_u32(frame.len() as u32).await?;
    writer.write_all(frame).await?;
    writer.flush().await
}

/// 읽기 루프
async fn read_loop(mut reader: OwnedReadHalf, max_frame_size: usize, events: mpsc::Sender<ChannelEvent>) {
    loop {
        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!("TCP 스트림 종료");
                let _ = events.send(ChannelEvent::Close).await;
                return;
            }
            Err(e) => {
                let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                return;
            }
        };

        // 길이 필드를 믿을 수 없으면 스트림 동기화가 깨진 것
        if len > max_frame_size {
            let e = Error::FrameTooLarge {
                len,
                max: max_frame_size,
            };
            warn!("{}", e);
            let _ = events.send(ChannelEvent::Error(e.to_string())).await;
            return;
        }

        let mut buf = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut buf).await {
            let _ = events.send(ChannelEvent::Error(e.to_string())).await;
            return;
        }

        match Message::from_bytes(&buf) {
            Some(message) => {
                if events.send(ChannelEvent::Message(message)).await.is_err() {
                    return;
                }
            }
            None => debug!("깨진 프레임 폐기: {} bytes", len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next_event(events: &mut ChannelEvents) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out")
            .expect("events ended")
    }

    async fn pair(config: &Config) -> ((Arc<TcpChannel>, ChannelEvents), (Arc<TcpChannel>, ChannelEvents)) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_config = config.clone();
        let accepted = tokio::spawn(async move { TcpChannel::accept(&listener, &accept_config).await.unwrap() });
        let connected = TcpChannel::connect(addr, config).await.unwrap();
        (accepted.await.unwrap(), connected)
    }

    #[tokio::test]
    async fn test_loopback_delivers_messages() {
        let ((server, mut server_events), (client, mut client_events)) = pair(&Config::default()).await;
        assert_eq!(next_event(&mut server_events).await, ChannelEvent::Open);
        assert_eq!(next_event(&mut client_events).await, ChannelEvent::Open);

        client.send(&Message::RequestFileList).unwrap();
        assert_eq!(
            next_event(&mut server_events).await,
            ChannelEvent::Message(Message::RequestFileList)
        );

        server.send(&Message::request_files(["a", "b"])).unwrap();
        assert_eq!(
            next_event(&mut client_events).await,
            ChannelEvent::Message(Message::request_files(["a", "b"]))
        );
        assert_eq!(server.buffered_amount(), 0);
    }

    #[tokio::test]
    async fn test_close_reaches_remote() {
        let ((_server, mut server_events), (client, _client_events)) = pair(&Config::default()).await;
        next_event(&mut server_events).await;

        client.send(&Message::RequestFileList).unwrap();
        client.close();

        assert_eq!(
            next_event(&mut server_events).await,
            ChannelEvent::Message(Message::RequestFileList)
        );
        assert_eq!(next_event(&mut server_events).await, ChannelEvent::Close);
        assert!(matches!(client.send(&Message::RequestFileList), Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Config::default();
        let accepted = tokio::spawn(async move { TcpChannel::accept(&listener, &config).await.unwrap() });

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let (_server, mut events) = accepted.await.unwrap();
        assert_eq!(next_event(&mut events).await, ChannelEvent::Open);

        raw.write_u32(4).await.unwrap();
        raw.write_all(&[0xde, 0xad, 0xbe, 0xef]).await.unwrap();
        let valid = Message::RequestFileList.to_bytes().unwrap();
        raw.write_u32(valid.len() as u32).await.unwrap();
        raw.write_all(&valid).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::Message(Message::RequestFileList)
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Config {
            max_frame_size: 128,
            ..Config::default()
        };
        let accepted = tokio::spawn(async move { TcpChannel::accept(&listener, &config).await.unwrap() });

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let (_server, mut events) = accepted.await.unwrap();
        next_event(&mut events).await;

        raw.write_u32(1 << 20).await.unwrap();
        assert!(matches!(next_event(&mut events).await, ChannelEvent::Error(_)));
    }
}
