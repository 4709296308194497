//! 프로토콜 설정

use std::time::Duration;

use crate::backpressure::BackpressureConfig;
use crate::chunk::ChunkPlan;
use crate::{
    Error, Result, DEFAULT_BACKPRESSURE_TIMEOUT_MS, DEFAULT_CHUNK_SIZE, DEFAULT_HIGH_WATERMARK,
    DEFAULT_POLL_INTERVAL_MS,
};

/// peerdrop 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 채널 송신 버퍼 high watermark (바이트)
    /// 이 값을 넘으면 다음 청크 전송 전에 대기
    pub high_watermark: usize,

    /// 백프레셔 폴링 간격 (밀리초)
    pub poll_interval_ms: u64,

    /// 백프레셔 최대 대기 시간 (밀리초)
    /// 초과 시 수위와 무관하게 전송 재개
    pub backpressure_timeout_ms: u64,

    /// 단일 프레임 최대 크기 (바이트, 스트림 채널용)
    pub max_frame_size: usize,

    /// 채널 이벤트 큐 크기
    pub event_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,             // 50ms
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT_MS, // 10초
            max_frame_size: 16 * 1024 * 1024,                         // 16MB
            event_queue_size: 1024,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 파일 크기에 대한 총 청크 수 (ceil(size / chunk_size))
    pub fn total_chunks(&self, size: u64) -> u64 {
        ChunkPlan::new(size, self.chunk_size).total_chunks()
    }

    /// 백프레셔 게이트 파라미터
    pub fn backpressure(&self) -> BackpressureConfig {
        BackpressureConfig {
            high_watermark: self.high_watermark,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.backpressure_timeout_ms),
        }
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.high_watermark == 0 {
            return Err(Error::InvalidConfig("high_watermark must be > 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("poll_interval_ms must be > 0".into()));
        }
        // 청크 하나 + 헤더 여유분은 프레임에 들어가야 함
        if self.max_frame_size < self.chunk_size + 1024 {
            return Err(Error::InvalidConfig(format!(
                "max_frame_size {} too small for chunk_size {}",
                self.max_frame_size, self.chunk_size
            )));
        }
        if self.event_queue_size == 0 {
            return Err(Error::InvalidConfig("event_queue_size must be > 0".into()));
        }
        Ok(())
    }

    /// 저사양 기기용 설정
    pub fn low_spec() -> Self {
        Self {
            chunk_size: 16 * 1024,        // 16KB
            high_watermark: 256 * 1024,   // 256KB
            poll_interval_ms: 100,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT_MS,
            max_frame_size: 4 * 1024 * 1024,
            event_queue_size: 256,
        }
    }

    /// 고성능 기기용 설정
    pub fn high_performance() -> Self {
        Self {
            chunk_size: 256 * 1024,           // 256KB
            high_watermark: 8 * 1024 * 1024, // 8MB
            poll_interval_ms: 20,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT_MS,
            max_frame_size: 32 * 1024 * 1024,
            event_queue_size: 4096,
        }
    }
}
