//! 송신자 (파일 공개측)
//!
//! - 피어별 세션: 진행률 기록 + 순차 작업 워커
//! - REQUEST_FILE_LIST → FILE_LIST, REQUEST_FILES → 파일별 전송 작업
//! - 한 연결에서는 한 번에 한 파일만 스트리밍, 피어끼리는 독립적으로 동시 진행
//! - 연결 종료 시 진행 중 작업 즉시 중단 (재개 없음)

use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backpressure::gate;
use crate::channel::{Channel, ChannelEvent, ChannelEvents, PeerId};
use crate::chunk::{self, ChunkPlan};
use crate::message::{ChunkMessage, FileMetaMessage, Message};
use crate::progress::{ProgressTracker, ProgressTx};
use crate::source::{FileHandle, FileSet};
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// (피어, 파일) 하나의 전송 커서
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub name: String,
    pub size: u64,
    pub mime: String,

    /// 분할 계획
    pub plan: ChunkPlan,

    /// 다음에 보낼 바이트 위치
    pub offset: u64,

    /// 다음에 보낼 청크 인덱스
    pub chunk_index: u64,
}

impl TransferJob {
    pub fn new(handle: &FileHandle, chunk_size: usize) -> Self {
        Self {
            name: handle.name.clone(),
            size: handle.size,
            mime: handle.mime.clone(),
            plan: ChunkPlan::new(handle.size, chunk_size),
            offset: 0,
            chunk_index: 0,
        }
    }

    pub fn total_chunks(&self) -> u64 {
        self.plan.total_chunks()
    }

    /// min(100, offset / size * 100)
    pub fn percent(&self) -> f64 {
        chunk::percent(self.offset, self.size)
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.size
    }

    /// 첫 청크 전에 보내는 메타데이터
    pub fn meta_message(&self) -> Message {
        Message::FileMeta(FileMetaMessage {
            name: self.name.clone(),
            size: self.size,
            mime: self.mime.clone(),
            total_chunks: self.total_chunks(),
        })
    }

    /// 다음 청크 범위 (끝났으면 None)
    pub fn next_range(&self) -> Option<Range<u64>> {
        if self.is_done() {
            return None;
        }
        Some(self.plan.range_at(self.offset))
    }

    /// 청크 하나 전송 후 커서 이동
    pub fn advance(&mut self, len: usize) {
        self.offset += len as u64;
        self.chunk_index += 1;
    }
}

/// 파일 하나를 채널로 스트리밍
///
/// FILE_META 한 번, 이어서 [0, size)를 빈틈/겹침 없이 덮는 CHUNK들.
/// 매 청크 전에 백프레셔 게이트를 통과하고, 매 청크 후 진행률을 발행.
/// 마지막에 100% 완료 이벤트를 정확히 한 번 발행
pub async fn send_file<C>(
    channel: &C,
    handle: &FileHandle,
    config: &Config,
    progress: &ProgressTracker,
    stats: &RwLock<TransferStats>,
) -> Result<()>
where
    C: Channel + ?Sized,
{
    let mut job = TransferJob::new(handle, config.chunk_size);
    let backpressure = config.backpressure();

    channel.send(&job.meta_message())?;
    progress.begin(&job.name);
    debug!(
        peer = channel.peer_id(),
        "파일 전송 시작: {} ({} bytes, {} chunks)",
        job.name,
        job.size,
        job.total_chunks()
    );

    while let Some(range) = job.next_range() {
        let outcome = gate(channel, &backpressure).await;
        stats.write().record_gate(outcome);

        let len = (range.end - range.start) as usize;
        let data = handle.read_range(range.start, len).await?;
        if data.len() != len {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{}: short read at offset {}", job.name, range.start),
            )));
        }

        channel.send(&Message::Chunk(ChunkMessage {
            name: job.name.clone(),
            offset: job.offset,
            index: job.chunk_index,
            data,
        }))?;
        stats.write().record_chunk(len);

        job.advance(len);
        progress.update(&job.name, job.percent());
    }

    progress.complete(&job.name);
    stats.write().completed_files += 1;
    debug!(peer = channel.peer_id(), "파일 전송 완료: {}", job.name);

    Ok(())
}

/// 피어 세션 (연결 하나)
struct PeerSession {
    session_id: u64,
    progress: ProgressTracker,
    worker: JoinHandle<()>,
}

/// 송신자
pub struct Sender {
    /// 설정
    config: Config,

    /// 공개 중인 파일
    files: FileSet,

    /// 연결된 피어 세션
    peers: DashMap<PeerId, PeerSession>,

    /// 진행률 관찰자
    observer: Option<ProgressTx>,

    /// 전송 통계
    stats: Arc<RwLock<TransferStats>>,

    /// 다음 세션 ID
    next_session_id: AtomicU64,
}

impl Sender {
    /// 새 송신자 생성
    pub fn new(config: Config, files: FileSet) -> Self {
        Self {
            config,
            files,
            peers: DashMap::new(),
            observer: None,
            stats: Arc::new(RwLock::new(TransferStats::new())),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// 진행률 관찰자 연결
    pub fn with_progress(mut self, observer: ProgressTx) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 공개 중인 파일 목록
    pub fn files(&self) -> &FileSet {
        &self.files
    }

    /// 연결된 피어 목록
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    /// 피어 하나의 진행률 기록
    pub fn peer_progress(&self, peer: PeerId) -> Option<HashMap<String, f64>> {
        self.peers.get(&peer).map(|session| session.progress.snapshot())
    }

    /// 통계 반환
    pub fn get_stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    /// 피어 하나를 연결 종료까지 처리
    pub async fn serve_peer(self: Arc<Self>, channel: Arc<dyn Channel>, mut events: ChannelEvents) {
        let peer = channel.peer_id();
        let (session_id, jobs) = self.connect(channel.clone());

        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Open => {
                    debug!(peer, "채널 open");
                }
                ChannelEvent::Message(message) => {
                    if let Err(e) = self.handle_message(channel.as_ref(), &jobs, message) {
                        warn!(peer, "메시지 처리 실패, 연결 종료: {}", e);
                        break;
                    }
                }
                ChannelEvent::Close => {
                    info!(peer, "피어 연결 종료");
                    break;
                }
                ChannelEvent::Error(e) => {
                    warn!(peer, "채널 에러: {}", e);
                    break;
                }
            }
        }

        self.disconnect(peer, session_id);
    }

    /// 세션 생성 + 작업 워커 시작
    fn connect(&self, channel: Arc<dyn Channel>) -> (u64, mpsc::UnboundedSender<Vec<String>>) {
        let peer = channel.peer_id();
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let progress = ProgressTracker::new(peer, self.observer.clone());
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_jobs(
            channel,
            self.files.clone(),
            self.config.clone(),
            progress.clone(),
            self.stats.clone(),
            jobs_rx,
        ));

        let session = PeerSession {
            session_id,
            progress,
            worker,
        };
        if let Some(previous) = self.peers.insert(peer, session) {
            // 같은 피어의 이전 연결은 버림
            previous.worker.abort();
        }
        self.stats.write().peers_connected += 1;
        info!(peer, "피어 연결");

        (session_id, jobs_tx)
    }

    /// 세션 제거 + 진행 중 작업 중단
    fn disconnect(&self, peer: PeerId, session_id: u64) {
        if let Some((_, session)) = self.peers.remove_if(&peer, |_, s| s.session_id == session_id) {
            session.worker.abort();
            self.stats.write().peers_disconnected += 1;
            debug!(peer, "피어 세션 제거");
        }
    }

    /// 메시지 타입별 처리
    fn handle_message(
        &self,
        channel: &dyn Channel,
        jobs: &mpsc::UnboundedSender<Vec<String>>,
        message: Message,
    ) -> Result<()> {
        match message {
            Message::RequestFileList => self.send_file_list(channel),
            Message::RequestFiles(request) => {
                debug!(peer = channel.peer_id(), "파일 요청: {:?}", request.names);
                jobs.send(request.names).map_err(|_| Error::ChannelClosed)
            }
            other => {
                debug!(
                    peer = channel.peer_id(),
                    "송신측에서 처리하지 않는 메시지 무시: {:?}",
                    other.msg_type()
                );
                Ok(())
            }
        }
    }

    /// 현재 manifest 전송
    fn send_file_list(&self, channel: &dyn Channel) -> Result<()> {
        let list = self.files.manifest();
        debug!(peer = channel.peer_id(), "manifest 전송: {} files", list.len());
        channel.send(&Message::file_list(list))?;
        self.stats.write().manifests += 1;
        Ok(())
    }
}

/// 피어 하나의 작업 워커: 요청 배치를 FIFO로, 배치 안의 파일을 순서대로 전송
async fn run_jobs(
    channel: Arc<dyn Channel>,
    files: FileSet,
    config: Config,
    progress: ProgressTracker,
    stats: Arc<RwLock<TransferStats>>,
    mut jobs: mpsc::UnboundedReceiver<Vec<String>>,
) {
    let peer = channel.peer_id();

    while let Some(names) = jobs.recv().await {
        for name in files.select(&names) {
            // 요청 이후 목록에서 빠진 파일은 건너뜀
            let Some(handle) = files.get(&name) else {
                debug!(peer, "제거된 파일 건너뜀: {}", name);
                continue;
            };

            match send_file(channel.as_ref(), &handle, &config, &progress, &stats).await {
                Ok(()) => {
                    info!(peer, "전송 완료: {} ({} bytes)", handle.name, handle.size);
                }
                Err(Error::ChannelClosed) => {
                    warn!(peer, "전송 중 연결 끊김: {}", handle.name);
                    stats.write().abandoned_files += 1;
                    return;
                }
                Err(e) => {
                    warn!(peer, "전송 중단: {}: {}", handle.name, e);
                    stats.write().abandoned_files += 1;
                }
            }
        }
    }
}
