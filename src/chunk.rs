//! 청크 분할과 재조립
//!
//! - ChunkPlan: 송신측 분할 계산 (고정 크기 C, 마지막 청크만 짧음)
//! - ReassemblyBuffer: 수신측 offset → payload 누적, 완료 시 하나의 파일로 결합

use std::collections::BTreeMap;
use std::ops::Range;
use std::time::Instant;

use bytes::{Bytes, BytesMut};

/// 파일 하나의 청크 분할 계획
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// 파일 크기 (바이트)
    pub size: u64,

    /// 청크 크기 (바이트)
    pub chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(size: u64, chunk_size: usize) -> Self {
        Self {
            size,
            chunk_size: chunk_size.max(1) as u64,
        }
    }

    /// 총 청크 수 = ceil(size / chunk_size)
    pub fn total_chunks(&self) -> u64 {
        self.size.div_ceil(self.chunk_size)
    }

    /// offset에서 시작하는 다음 청크의 바이트 범위
    pub fn range_at(&self, offset: u64) -> Range<u64> {
        let end = offset.saturating_add(self.chunk_size).min(self.size);
        offset.min(end)..end
    }

    /// 전체 청크 범위 (index, range)
    pub fn ranges(&self) -> impl Iterator<Item = (u64, Range<u64>)> + '_ {
        (0..self.total_chunks()).map(move |index| (index, self.range_at(index * self.chunk_size)))
    }
}

/// 진행률 (0.0 ~ 100.0)
pub fn percent(done: u64, size: u64) -> f64 {
    if size == 0 {
        return 100.0;
    }
    (done as f64 / size as f64 * 100.0).min(100.0)
}

/// 재조립이 끝난 파일
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedFile {
    pub name: String,
    pub mime: String,
    pub data: Bytes,
}

/// 청크 삽입 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 새 offset에 삽입
    Inserted,

    /// 같은 offset의 기존 payload를 덮어씀
    Replaced,

    /// 범위를 벗어나거나 총합이 size를 넘는 청크 (폐기)
    Rejected,
}

/// 수신측 재조립 버퍼 (파일 하나)
///
/// 불변식: payload 길이 합은 size를 넘지 않음
#[derive(Debug)]
pub struct ReassemblyBuffer {
    pub name: String,
    pub size: u64,
    pub mime: String,

    /// offset → payload (offset 오름차순)
    parts: BTreeMap<u64, Bytes>,

    /// 수신된 payload 길이 합
    received: u64,

    /// 생성 시간
    pub created_at: Instant,
}

impl ReassemblyBuffer {
    pub fn new(name: impl Into<String>, size: u64, mime: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime: mime.into(),
            parts: BTreeMap::new(),
            received: 0,
            created_at: Instant::now(),
        }
    }

    /// 청크 삽입 (같은 offset은 나중 것이 이김)
    pub fn insert(&mut self, offset: u64, payload: Bytes) -> InsertOutcome {
        let len = payload.len() as u64;
        match offset.checked_add(len) {
            Some(end) if end <= self.size => {}
            _ => return InsertOutcome::Rejected,
        }

        let previous = self.parts.get(&offset).map(|p| p.len() as u64).unwrap_or(0);
        let received = self.received - previous + len;
        if received > self.size {
            return InsertOutcome::Rejected;
        }

        self.received = received;
        match self.parts.insert(offset, payload) {
            Some(_) => InsertOutcome::Replaced,
            None => InsertOutcome::Inserted,
        }
    }

    /// 수신된 바이트 수
    pub fn received(&self) -> u64 {
        self.received
    }

    /// 수신된 청크 수
    pub fn chunk_count(&self) -> usize {
        self.parts.len()
    }

    /// 진행률 (0.0 ~ 100.0)
    pub fn percent(&self) -> f64 {
        percent(self.received, self.size)
    }

    /// 완료 여부 (received >= size)
    pub fn is_complete(&self) -> bool {
        self.received >= self.size
    }

    /// offset 오름차순으로 결합해 완성 파일 생성
    pub fn into_finished(self) -> FinishedFile {
        let mut data = BytesMut::with_capacity(self.received as usize);
        for payload in self.parts.values() {
            data.extend_from_slice(payload);
        }

        FinishedFile {
            name: self.name,
            mime: self.mime,
            data: data.freeze(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn split(data: &[u8], chunk_size: usize) -> Vec<(u64, Bytes)> {
        let plan = ChunkPlan::new(data.len() as u64, chunk_size);
        plan.ranges()
            .map(|(_, r)| (r.start, Bytes::copy_from_slice(&data[r.start as usize..r.end as usize])))
            .collect()
    }

    #[test]
    fn test_plan_ranges() {
        let plan = ChunkPlan::new(100, 64);
        let ranges: Vec<_> = plan.ranges().collect();

        assert_eq!(plan.total_chunks(), 2);
        assert_eq!(ranges, vec![(0, 0..64), (1, 64..100)]);
        assert_eq!(ChunkPlan::new(0, 64).total_chunks(), 0);
        assert_eq!(ChunkPlan::new(128, 64).total_chunks(), 2);
    }

    #[test]
    fn test_total_chunks_near_max_size() {
        assert_eq!(ChunkPlan::new(u64::MAX, 64).total_chunks(), 1u64 << 58);
        assert_eq!(ChunkPlan::new(u64::MAX, 1).total_chunks(), u64::MAX);
        assert_eq!(ChunkPlan::new(u64::MAX, 0).range_at(u64::MAX - 1), u64::MAX - 1..u64::MAX);
    }

    #[test]
    fn test_assembly_in_order() {
        let data: Vec<u8> = (0..250).map(|i| i as u8).collect();
        let mut buffer = ReassemblyBuffer::new("a.bin", 250, "application/octet-stream");

        for (offset, payload) in split(&data, 100) {
            assert_eq!(buffer.insert(offset, payload), InsertOutcome::Inserted);
        }

        assert!(buffer.is_complete());
        assert_eq!(buffer.percent(), 100.0);
        assert_eq!(buffer.into_finished().data.as_ref(), &data[..]);
    }

    #[test]
    fn test_any_arrival_order() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let mut chunks = split(&data, 64);
            chunks.shuffle(&mut rng);

            let mut buffer = ReassemblyBuffer::new("r.bin", data.len() as u64, "");
            let mut last = 0.0;
            for (offset, payload) in chunks {
                assert!(!buffer.is_complete());
                buffer.insert(offset, payload);
                assert!(buffer.percent() >= last);
                last = buffer.percent();
            }

            assert!(buffer.is_complete());
            assert_eq!(buffer.into_finished().data.as_ref(), &data[..]);
        }
    }

    #[test]
    fn test_last_write_wins() {
        let mut buffer = ReassemblyBuffer::new("w.bin", 8, "");

        assert_eq!(buffer.insert(0, Bytes::from_static(b"aaaa")), InsertOutcome::Inserted);
        assert_eq!(buffer.insert(0, Bytes::from_static(b"bbbb")), InsertOutcome::Replaced);
        assert_eq!(buffer.received(), 4);
        assert_eq!(buffer.chunk_count(), 1);

        buffer.insert(4, Bytes::from_static(b"cccc"));
        assert_eq!(buffer.into_finished().data.as_ref(), b"bbbbcccc");
    }

    #[test]
    fn test_oversized_chunks_rejected() {
        let mut buffer = ReassemblyBuffer::new("o.bin", 10, "");

        // 범위 초과
        assert_eq!(buffer.insert(8, Bytes::from_static(b"xyz")), InsertOutcome::Rejected);
        assert_eq!(buffer.insert(u64::MAX, Bytes::from_static(b"x")), InsertOutcome::Rejected);

        // 겹치는 청크로 총합 초과
        assert_eq!(buffer.insert(0, Bytes::from_static(b"abcdefgh")), InsertOutcome::Inserted);
        assert_eq!(buffer.insert(4, Bytes::from_static(b"abcdef")), InsertOutcome::Rejected);

        assert_eq!(buffer.received(), 8);
        assert!(!buffer.is_complete());
    }

    #[test]
    fn test_zero_size_is_complete() {
        let buffer = ReassemblyBuffer::new("empty", 0, "text/plain");

        assert!(buffer.is_complete());
        assert_eq!(buffer.percent(), 100.0);

        let file = buffer.into_finished();
        assert!(file.data.is_empty());
        assert_eq!(file.mime, "text/plain");
    }
}
