//! 프로토콜 메시지 정의
//!
//! 수신자 → 송신자: `RequestFileList`, `RequestFiles`
//! 송신자 → 수신자: `FileList`, `FileMeta`, `Chunk`
//!
//! 같은 연결에서 `FileMeta`는 항상 해당 파일의 첫 `Chunk`보다 먼저 전송됨

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Result, MAGIC_NUMBER, PROTOCOL_VERSION};

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// manifest 요청
    RequestFileList = 1,

    /// manifest 응답 (매번 전체 목록)
    FileList = 2,

    /// 파일 전송 요청 (반복 가능, 요청마다 독립)
    RequestFiles = 3,

    /// 파일 메타데이터 (첫 청크보다 먼저)
    FileMeta = 4,

    /// 데이터 청크
    Chunk = 5,
}

/// 메시지 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    /// 매직 넘버
    pub magic: u32,

    /// 프로토콜 버전
    pub version: u8,

    /// 메시지 타입
    pub msg_type: MessageType,

    /// 메시지 길이 (헤더 제외)
    pub payload_len: u32,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType, payload_len: u32) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            msg_type,
            payload_len,
        }
    }
}

/// 수신자가 보는 파일 하나 (manifest 항목)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub size: u64,
    /// 참고용 mime 문자열 (비어 있을 수 있음)
    pub mime: String,
}

/// manifest 응답
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileListMessage {
    pub list: Vec<ManifestEntry>,
}

/// 파일 전송 요청
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFilesMessage {
    pub names: Vec<String>,
}

/// 파일 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetaMessage {
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub total_chunks: u64,
}

/// 데이터 청크
///
/// `offset + data.len() <= size`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub name: String,
    pub offset: u64,
    pub index: u64,
    pub data: Bytes,
}

/// 통합 메시지 enum
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    RequestFileList,
    FileList(FileListMessage),
    RequestFiles(RequestFilesMessage),
    FileMeta(FileMetaMessage),
    Chunk(ChunkMessage),
}

impl Message {
    /// 메시지 타입 반환
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::RequestFileList => MessageType::RequestFileList,
            Message::FileList(_) => MessageType::FileList,
            Message::RequestFiles(_) => MessageType::RequestFiles,
            Message::FileMeta(_) => MessageType::FileMeta,
            Message::Chunk(_) => MessageType::Chunk,
        }
    }

    pub fn file_list(list: Vec<ManifestEntry>) -> Self {
        Message::FileList(FileListMessage { list })
    }

    pub fn request_files<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Message::RequestFiles(RequestFilesMessage {
            names: names.into_iter().map(Into::into).collect(),
        })
    }

    /// 바이트로 직렬화 (헤더 + 페이로드)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Message::RequestFileList => Vec::new(),
            Message::FileList(m) => bincode::serialize(m)?,
            Message::RequestFiles(m) => bincode::serialize(m)?,
            Message::FileMeta(m) => bincode::serialize(m)?,
            Message::Chunk(m) => bincode::serialize(m)?,
        };
        let header = MessageHeader::new(self.msg_type(), payload.len() as u32);
        let header_bytes = bincode::serialize(&header)?;

        let mut buf = Vec::with_capacity(header_bytes.len() + payload.len());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// 바이트에서 역직렬화
    ///
    /// 매직/버전 불일치, 알 수 없는 타입, 깨진 페이로드는 모두 `None`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let header: MessageHeader = bincode::deserialize(bytes).ok()?;
        if header.magic != MAGIC_NUMBER || header.version != PROTOCOL_VERSION {
            return None;
        }

        let header_size = bincode::serialized_size(&header).ok()? as usize;
        let end = header_size.checked_add(header.payload_len as usize)?;
        let payload = bytes.get(header_size..end)?;

        let message = match header.msg_type {
            MessageType::RequestFileList => Message::RequestFileList,
            MessageType::FileList => Message::FileList(bincode::deserialize(payload).ok()?),
            MessageType::RequestFiles => Message::RequestFiles(bincode::deserialize(payload).ok()?),
            MessageType::FileMeta => Message::FileMeta(bincode::deserialize(payload).ok()?),
            MessageType::Chunk => Message::Chunk(bincode::deserialize(payload).ok()?),
        };
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_serialization() {
        let msg = Message::Chunk(ChunkMessage {
            name: "a.txt".into(),
            offset: 64,
            index: 1,
            data: Bytes::from(vec![1, 2, 3, 4, 5]),
        });

        let bytes = msg.to_bytes().unwrap();
        let restored = Message::from_bytes(&bytes).unwrap();

        assert_eq!(restored.msg_type(), MessageType::Chunk);
        assert_eq!(msg, restored);
    }

    #[test]
    fn test_file_list_serialization() {
        let msg = Message::file_list(vec![ManifestEntry {
            name: "a.txt".into(),
            size: 100,
            mime: "text/plain".into(),
        }]);

        let restored = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn test_empty_request_is_header_only() {
        let bytes = Message::RequestFileList.to_bytes().unwrap();
        let header_size = bincode::serialized_size(&MessageHeader::new(MessageType::RequestFileList, 0))
            .unwrap() as usize;

        assert_eq!(bytes.len(), header_size);
        assert_eq!(Message::from_bytes(&bytes), Some(Message::RequestFileList));
    }

    #[test]
    fn test_malformed_is_ignored() {
        assert!(Message::from_bytes(&[]).is_none());
        assert!(Message::from_bytes(&[0xFF; 3]).is_none());

        // 매직 넘버 불일치
        let mut bytes = Message::RequestFileList.to_bytes().unwrap();
        bytes[0] ^= 0xFF;
        assert!(Message::from_bytes(&bytes).is_none());

        // 잘린 페이로드
        let bytes = Message::request_files(["a.txt", "b.txt"]).to_bytes().unwrap();
        assert!(Message::from_bytes(&bytes[..bytes.len() - 2]).is_none());
    }

    #[test]
    fn test_unknown_message_type_is_ignored() {
        let mut bytes = Message::RequestFileList.to_bytes().unwrap();
        // magic(4) + version(1) 다음이 msg_type 인덱스
        bytes[5] = 42;
        assert!(Message::from_bytes(&bytes).is_none());
    }
}
