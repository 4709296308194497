//! 에러 타입 정의

use thiserror::Error;

/// peerdrop 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("연결 종료")]
    ChannelClosed,

    #[error("프레임 크기 초과: {len} bytes (최대 {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("중복 파일 이름: {name}")]
    DuplicateFile { name: String },

    #[error("파일 없음: {name}")]
    FileNotFound { name: String },

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),

    #[error("알 수 없는 에러: {0}")]
    Unknown(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
