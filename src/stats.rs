//! 전송 통계

use std::time::{Duration, Instant};

use crate::backpressure::GateOutcome;

/// 전체 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 연결된 적 있는 피어 수
    pub peers_connected: u64,

    /// 연결 종료된 피어 수
    pub peers_disconnected: u64,

    /// 보낸/받은 manifest 수
    pub manifests: u64,

    /// 완료된 파일 수
    pub completed_files: u64,

    /// 중단된 파일 수 (연결 종료, 읽기 실패)
    pub abandoned_files: u64,

    /// 총 payload 바이트
    pub total_bytes: u64,

    /// 총 청크 수
    pub total_chunks: u64,

    /// 폐기된 청크 수 (버퍼 없음, 범위 초과)
    pub dropped_chunks: u64,

    /// 백프레셔 대기 횟수
    pub backpressure_waits: u64,

    /// 백프레셔 타임아웃 횟수
    pub backpressure_timeouts: u64,

    /// 백프레셔로 대기한 총 시간
    pub backpressure_time: Duration,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            peers_connected: 0,
            peers_disconnected: 0,
            manifests: 0,
            completed_files: 0,
            abandoned_files: 0,
            total_bytes: 0,
            total_chunks: 0,
            dropped_chunks: 0,
            backpressure_waits: 0,
            backpressure_timeouts: 0,
            backpressure_time: Duration::ZERO,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 청크 하나 기록
    pub fn record_chunk(&mut self, bytes: usize) {
        self.total_chunks += 1;
        self.total_bytes += bytes as u64;
    }

    /// 백프레셔 게이트 결과 기록
    pub fn record_gate(&mut self, outcome: GateOutcome) {
        match outcome {
            GateOutcome::Clear => {}
            GateOutcome::Drained(waited) => {
                self.backpressure_waits += 1;
                self.backpressure_time += waited;
            }
            GateOutcome::TimedOut(waited) => {
                self.backpressure_waits += 1;
                self.backpressure_timeouts += 1;
                self.backpressure_time += waited;
            }
        }
    }

    /// 전체 처리율 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Files: {} done, {} abandoned | Bytes: {} | Throughput: {:.2} MB/s | Backpressure: {} waits ({} timeouts, {:.2}s)",
            self.elapsed().as_secs_f64(),
            self.completed_files,
            self.abandoned_files,
            self.total_bytes,
            self.overall_throughput() / 1_000_000.0,
            self.backpressure_waits,
            self.backpressure_timeouts,
            self.backpressure_time.as_secs_f64(),
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
