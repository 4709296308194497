//! 송신측 파일 소스
//!
//! - FileSource: 임의 위치 바이트 범위 읽기
//! - FileHandle: 이름/크기/mime + 소스
//! - FileSet: 현재 세션에서 공개 중인 파일 목록 (이름은 유일)

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::info;

use crate::message::ManifestEntry;
use crate::{Error, Result};

/// 임의 위치 읽기가 가능한 데이터 소스
pub trait FileSource: Send + Sync {
    /// `[offset, offset + len)` 범위 읽기
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes>;

    /// 읽기가 블로킹 IO인지 (true면 blocking 스레드에서 실행)
    fn is_blocking(&self) -> bool {
        true
    }
}

/// 메모리 상의 데이터
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl FileSource for MemorySource {
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data.slice(start..end))
    }

    fn is_blocking(&self) -> bool {
        false
    }
}

/// 디스크 파일
///
/// 위치 지정 읽기라서 여러 피어의 작업이 잠금 없이 동시에 읽음
#[derive(Debug)]
pub struct DiskSource {
    path: PathBuf,
    file: File,
}

impl DiskSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self { path, file })
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.file.seek_read(buf, offset)? {
                0 => return Err(io::ErrorKind::UnexpectedEof.into()),
                n => {
                    let rest = buf;
                    buf = &mut rest[n..];
                    offset += n as u64;
                }
            }
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

impl FileSource for DiskSource {
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(&mut buf, offset).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("{} @{}: {}", self.path.display(), offset, e),
            )
        })?;
        Ok(Bytes::from(buf))
    }
}

/// 전송 가능한 파일 하나
#[derive(Clone)]
pub struct FileHandle {
    pub name: String,
    pub size: u64,
    pub mime: String,
    source: Arc<dyn FileSource>,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mime", &self.mime)
            .finish()
    }
}

impl FileHandle {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        mime: impl Into<String>,
        source: Arc<dyn FileSource>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            mime: mime.into(),
            source,
        }
    }

    /// 메모리 데이터로 생성 (mime 미지정 시 확장자로 추정)
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>, mime: Option<&str>) -> Self {
        let name = name.into();
        let data = data.into();
        let mime = mime.unwrap_or_else(|| guess_mime(&name)).to_string();
        Self::new(name, data.len() as u64, mime, Arc::new(MemorySource::new(data)))
    }

    /// 디스크 파일 열기
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::FileNotFound {
                name: path.display().to_string(),
            })?
            .to_string();
        let size = std::fs::metadata(path)?.len();
        let mime = guess_mime(&name).to_string();
        let source = DiskSource::open(path)?;

        Ok(Self::new(name, size, mime, Arc::new(source)))
    }

    /// manifest 항목
    pub fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            name: self.name.clone(),
            size: self.size,
            mime: self.mime.clone(),
        }
    }

    /// 바이트 범위 읽기
    pub async fn read_range(&self, offset: u64, len: usize) -> Result<Bytes> {
        if !self.source.is_blocking() {
            return self.source.read_at(offset, len);
        }

        let source = self.source.clone();
        tokio::task::spawn_blocking(move || source.read_at(offset, len))
            .await
            .map_err(|e| Error::Unknown(format!("read task failed: {e}")))?
    }
}

/// 공개 중인 파일 목록
///
/// 여러 피어의 작업이 동시에 읽음. 작업 시작 직전에 이름으로 다시 조회하므로
/// 요청 후 제거된 파일은 건너뜀
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    files: Arc<RwLock<Vec<FileHandle>>>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 파일 추가 (같은 이름이 있으면 거부)
    pub fn add(&self, handle: FileHandle) -> Result<()> {
        let mut files = self.files.write();
        if files.iter().any(|f| f.name == handle.name) {
            return Err(Error::DuplicateFile { name: handle.name });
        }
        info!("파일 추가: {} ({} bytes, {})", handle.name, handle.size, handle.mime);
        files.push(handle);
        Ok(())
    }

    /// 이름으로 제거
    pub fn remove(&self, name: &str) -> Option<FileHandle> {
        let mut files = self.files.write();
        let index = files.iter().position(|f| f.name == name)?;
        Some(files.remove(index))
    }

    pub fn clear(&self) {
        self.files.write().clear();
    }

    pub fn get(&self, name: &str) -> Option<FileHandle> {
        self.files.read().iter().find(|f| f.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// 현재 manifest (추가 순서)
    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.files.read().iter().map(FileHandle::manifest_entry).collect()
    }

    /// 요청된 이름들을 목록 순서로 정렬, 중복/없는 이름은 제외
    pub fn select(&self, names: &[String]) -> Vec<String> {
        self.files
            .read()
            .iter()
            .filter(|f| names.contains(&f.name))
            .map(|f| f.name.clone())
            .collect()
    }
}

/// 확장자 기반 mime 추정 (모르면 빈 문자열)
pub fn guess_mime(name: &str) -> &'static str {
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "",
    };

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "",
    }
}
