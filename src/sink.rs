//! 완성 파일 저장
//!
//! 수신측이 넘겨준 `FinishedFile`을 디렉터리에 기록

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::info;

use crate::chunk::FinishedFile;
use crate::{Error, Result};

/// 디렉터리 저장소
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 저장 경로 계산 (이름에서 파일명 부분만 사용)
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let file_name = Path::new(name)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .last()
            .ok_or_else(|| Error::FileNotFound { name: name.to_string() })?;

        Ok(self.root.join(file_name))
    }

    /// 파일 하나 저장. 저장된 경로 반환
    pub async fn save(&self, file: &FinishedFile) -> Result<PathBuf> {
        let path = self.path_for(&file.name)?;
        fs::create_dir_all(&self.root).await?;
        fs::write(&path, &file.data).await?;

        info!("저장 완료: {} ({} bytes, {})", path.display(), file.data.len(), file.mime);
        Ok(path)
    }
}
