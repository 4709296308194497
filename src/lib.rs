//! # peerdrop
//!
//! 메시지 기반 P2P 채널 위의 파일 목록/요청/스트리밍 프로토콜
//!
//! ## 핵심 특징
//! - **목록 → 요청 → 푸시**: 수신자가 manifest를 받고 원하는 파일만 요청
//! - **청크 분할**: 고정 크기 청크로 잘라서 순서대로 전송
//! - **재조립**: offset 기반 버퍼로 도착 순서와 무관하게 복원
//! - **백프레셔**: 채널 송신 버퍼 수위(high watermark) 기반 흐름 제어
//! - **피어 독립성**: 느린 피어 하나가 다른 피어 전송을 막지 않음

pub mod backpressure;
pub mod channel;
pub mod chunk;
pub mod config;
pub mod error;
pub mod message;
pub mod progress;
pub mod receiver;
pub mod sender;
pub mod sink;
pub mod source;
pub mod stats;
pub mod tcp;

pub use backpressure::{gate, BackpressureConfig, GateOutcome};
pub use channel::{memory_pair, Channel, ChannelEvent, ChannelEvents, MemoryChannel, MemoryLink, PeerId};
pub use chunk::{ChunkPlan, FinishedFile, InsertOutcome, ReassemblyBuffer};
pub use config::Config;
pub use error::{Error, Result};
pub use message::{ManifestEntry, Message, MessageType};
pub use progress::{progress_channel, Progress, ProgressRx, ProgressTracker, ProgressTx};
pub use receiver::{FileStatus, FinishedFileReceiver, Receiver, ReceiverState};
pub use sender::{send_file, Sender, TransferJob};
pub use sink::DirectorySink;
pub use source::{DiskSource, FileHandle, FileSet, FileSource, MemorySource};
pub use stats::TransferStats;
pub use tcp::TcpChannel;

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024; // 64KB

/// 기본 송신 버퍼 high watermark (바이트)
pub const DEFAULT_HIGH_WATERMARK: usize = 1024 * 1024; // 1MB

/// 백프레셔 대기 중 폴링 간격 (밀리초)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// 백프레셔 최대 대기 시간 (밀리초)
pub const DEFAULT_BACKPRESSURE_TIMEOUT_MS: u64 = 10_000;

/// 매직 넘버 (프레임 식별용)
pub const MAGIC_NUMBER: u32 = 0x50445250; // "PDRP"
