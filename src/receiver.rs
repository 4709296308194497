//! 수신자 (파일 요청측)
//!
//! - 연결 직후 manifest 요청
//! - FILE_META / CHUNK를 파일별 재조립 버퍼로 분배
//! - 완성된 파일은 채널로 내보냄
//!
//! 재조립 버퍼는 연결 하나의 처리 태스크가 소유하므로 연결끼리 섞이지 않음

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent, ChannelEvents, PeerId};
use crate::chunk::{FinishedFile, InsertOutcome, ReassemblyBuffer};
use crate::message::{ChunkMessage, FileMetaMessage, ManifestEntry, Message};
use crate::progress::{ProgressTracker, ProgressTx};
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// 완성 파일 수신기 타입
pub type FinishedFileReceiver = mpsc::Receiver<FinishedFile>;

/// 수신자 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// 채널 연결됨
    Connected,

    /// REQUEST_FILE_LIST 전송 후 응답 대기
    AwaitingList,

    /// manifest 수신 완료 (파일 요청 가능)
    ListReady,

    /// 연결 종료
    Disconnected,
}

/// 파일별 수신 상태
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileStatus {
    MetaReceived,
    Receiving { percent: f64 },
    Complete,
}

/// 내부 명령
enum ReceiverCmd {
    Stop,
}

/// 수신자 내부 상태 (단일 태스크에서만 접근)
struct ReceiverInner {
    peer: PeerId,
    buffers: HashMap<String, ReassemblyBuffer>,
    manifest: Arc<RwLock<Vec<ManifestEntry>>>,
    downloads: Arc<DashMap<String, FileStatus>>,
    progress: ProgressTracker,
    stats: Arc<RwLock<TransferStats>>,
    state_tx: Arc<watch::Sender<ReceiverState>>,
    finished_tx: mpsc::Sender<FinishedFile>,
}

impl ReceiverInner {
    /// 이벤트 하나 처리. false면 연결 종료
    async fn handle_event(&mut self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Open => {
                debug!(peer = self.peer, "채널 open");
                true
            }
            ChannelEvent::Message(message) => {
                self.handle_message(message).await;
                true
            }
            ChannelEvent::Close => {
                info!(peer = self.peer, "송신자 연결 종료");
                false
            }
            ChannelEvent::Error(e) => {
                warn!(peer = self.peer, "채널 에러: {}", e);
                false
            }
        }
    }

    async fn handle_message(&mut self, message: Message) {
        match message {
            Message::FileList(list) => self.on_file_list(list.list),
            Message::FileMeta(meta) => self.on_meta(meta).await,
            Message::Chunk(chunk) => self.on_chunk(chunk).await,
            other => {
                debug!(
                    peer = self.peer,
                    "수신측에서 처리하지 않는 메시지 무시: {:?}",
                    other.msg_type()
                );
            }
        }
    }

    /// manifest 통째로 교체
    fn on_file_list(&mut self, list: Vec<ManifestEntry>) {
        info!(peer = self.peer, "manifest 수신: {} files", list.len());
        *self.manifest.write() = list;
        self.stats.write().manifests += 1;
        self.state_tx.send_replace(ReceiverState::ListReady);
    }

    /// 버퍼 생성 (진행 중이면 무시)
    async fn on_meta(&mut self, meta: FileMetaMessage) {
        if self.buffers.contains_key(&meta.name) {
            debug!(peer = self.peer, "중복 FILE_META 무시: {}", meta.name);
            return;
        }

        debug!(
            peer = self.peer,
            "FILE_META: {} ({} bytes, {} chunks)", meta.name, meta.size, meta.total_chunks
        );
        self.progress.begin(&meta.name);
        self.downloads.insert(meta.name.clone(), FileStatus::MetaReceived);

        let buffer = ReassemblyBuffer::new(meta.name.clone(), meta.size, meta.mime);
        let complete = buffer.is_complete();
        self.buffers.insert(meta.name.clone(), buffer);

        // 크기 0은 청크 없이 바로 완료
        if complete {
            self.finalize(&meta.name).await;
        }
    }

    async fn on_chunk(&mut self, chunk: ChunkMessage) {
        let Some(buffer) = self.buffers.get_mut(&chunk.name) else {
            debug!(peer = self.peer, "버퍼 없는 CHUNK 무시: {} @{}", chunk.name, chunk.offset);
            self.stats.write().dropped_chunks += 1;
            return;
        };

        let len = chunk.data.len();
        if buffer.insert(chunk.offset, chunk.data) == InsertOutcome::Rejected {
            debug!(
                peer = self.peer,
                "범위를 벗어난 CHUNK 폐기: {} @{} ({} bytes)", chunk.name, chunk.offset, len
            );
            self.stats.write().dropped_chunks += 1;
            return;
        }
        self.stats.write().record_chunk(len);

        if buffer.is_complete() {
            self.finalize(&chunk.name).await;
        } else {
            let percent = self.progress.update(&chunk.name, buffer.percent());
            self.downloads
                .insert(chunk.name, FileStatus::Receiving { percent });
        }
    }

    /// 버퍼 제거 + 완성 파일 전달
    async fn finalize(&mut self, name: &str) {
        let Some(buffer) = self.buffers.remove(name) else {
            return;
        };

        let elapsed = buffer.created_at.elapsed();
        let finished = buffer.into_finished();
        info!(
            peer = self.peer,
            "파일 완료: {} ({} bytes, {:.2}ms)",
            finished.name,
            finished.data.len(),
            elapsed.as_secs_f64() * 1000.0
        );

        self.progress.complete(name);
        self.downloads.insert(name.to_string(), FileStatus::Complete);
        self.stats.write().completed_files += 1;

        if self.finished_tx.send(finished).await.is_err() {
            debug!(peer = self.peer, "완성 파일 수신기가 닫힘: {}", name);
        }
    }

    /// 연결 종료 정리 (진행 중 버퍼 폐기)
    fn shutdown(&mut self) {
        if !self.buffers.is_empty() {
            warn!(peer = self.peer, "미완료 파일 {}개 폐기", self.buffers.len());
            self.stats.write().abandoned_files += self.buffers.len() as u64;
            self.buffers.clear();
        }
        self.stats.write().peers_disconnected += 1;
        self.state_tx.send_replace(ReceiverState::Disconnected);
    }
}

/// 수신자 핸들 (외부에서 제어용)
pub struct Receiver {
    channel: Arc<dyn Channel>,
    cmd_tx: mpsc::Sender<ReceiverCmd>,
    state_tx: Arc<watch::Sender<ReceiverState>>,
    state: watch::Receiver<ReceiverState>,
    manifest: Arc<RwLock<Vec<ManifestEntry>>>,
    downloads: Arc<DashMap<String, FileStatus>>,
    progress: ProgressTracker,
    stats: Arc<RwLock<TransferStats>>,
}

impl Receiver {
    /// 새 수신자 생성 및 시작
    ///
    /// 연결 직후 REQUEST_FILE_LIST를 보내고 AwaitingList 상태가 됨
    pub fn start(
        config: Config,
        channel: Arc<dyn Channel>,
        mut events: ChannelEvents,
        observer: Option<ProgressTx>,
    ) -> Result<(Self, FinishedFileReceiver)> {
        let peer = channel.peer_id();

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ReceiverCmd>(8);
        let (finished_tx, finished_rx) = mpsc::channel::<FinishedFile>(config.event_queue_size.max(1));
        let (state_tx, state) = watch::channel(ReceiverState::Connected);
        let state_tx = Arc::new(state_tx);

        let manifest = Arc::new(RwLock::new(Vec::new()));
        let downloads = Arc::new(DashMap::new());
        let progress = ProgressTracker::new(peer, observer);
        let stats = Arc::new(RwLock::new(TransferStats::new()));
        stats.write().peers_connected += 1;

        let mut inner = ReceiverInner {
            peer,
            buffers: HashMap::new(),
            manifest: manifest.clone(),
            downloads: downloads.clone(),
            progress: progress.clone(),
            stats: stats.clone(),
            state_tx: state_tx.clone(),
            finished_tx,
        };

        // 메인 처리 태스크
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(ReceiverCmd::Stop) | None => break,
                    },
                    event = events.recv() => match event {
                        Some(event) => {
                            if !inner.handle_event(event).await {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }

            inner.shutdown();
        });

        let receiver = Self {
            channel,
            cmd_tx,
            state_tx,
            state,
            manifest,
            downloads,
            progress,
            stats,
        };
        info!(peer, "수신자 시작");
        receiver.request_file_list()?;

        Ok((receiver, finished_rx))
    }

    /// manifest 요청 (언제든 다시 요청 가능)
    pub fn request_file_list(&self) -> Result<()> {
        // 응답이 먼저 처리될 수 있으므로 전송 전에 상태 변경
        let connected = self.state_tx.send_if_modified(|state| {
            if *state == ReceiverState::Disconnected {
                return false;
            }
            *state = ReceiverState::AwaitingList;
            true
        });
        if !connected {
            return Err(Error::ChannelClosed);
        }

        self.channel.send(&Message::RequestFileList)?;
        debug!(peer = self.channel.peer_id(), "manifest 요청");
        Ok(())
    }

    /// 파일 전송 요청 (반복 가능)
    pub fn request_files<I, S>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let message = Message::request_files(names);
        if let Message::RequestFiles(request) = &message {
            info!(peer = self.channel.peer_id(), "파일 요청: {:?}", request.names);
        }
        self.channel.send(&message)
    }

    /// 현재 manifest 반환. 목록 요청이 대기 중이면 다음 manifest 도착까지 대기
    ///
    /// 이미 ListReady면 저장된 목록을 바로 반환하므로, 새 목록이 필요하면
    /// `request_file_list` 후에 호출할 것.
    /// 응답 시간 제한은 없음. 필요하면 호출측에서 timeout으로 감쌀 것
    pub async fn wait_for_list(&self) -> Result<Vec<ManifestEntry>> {
        let mut state = self.state.clone();
        let reached = *state
            .wait_for(|s| matches!(s, ReceiverState::ListReady | ReceiverState::Disconnected))
            .await
            .map_err(|_| Error::ChannelClosed)?;

        match reached {
            ReceiverState::ListReady => Ok(self.manifest()),
            _ => Err(Error::ChannelClosed),
        }
    }

    /// 마지막으로 받은 manifest
    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.manifest.read().clone()
    }

    /// 현재 연결 상태
    pub fn state(&self) -> ReceiverState {
        *self.state.borrow()
    }

    pub fn file_status(&self, name: &str) -> Option<FileStatus> {
        self.downloads.get(name).map(|status| *status)
    }

    /// 전체 파일 상태
    pub fn downloads(&self) -> HashMap<String, FileStatus> {
        self.downloads
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// 파일별 진행률
    pub fn progress(&self) -> HashMap<String, f64> {
        self.progress.snapshot()
    }

    /// 송신자 피어 ID
    pub fn peer_id(&self) -> PeerId {
        self.channel.peer_id()
    }

    /// 통계 반환
    pub fn get_stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    /// 정지 (채널 종료 + 진행 중 버퍼 폐기)
    pub async fn stop(&self) {
        self.channel.close();
        let _ = self.cmd_tx.send(ReceiverCmd::Stop).await;
    }
}
