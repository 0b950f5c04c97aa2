use std::path::{Path, PathBuf};

use thiserror::Error;

/// 图片检索核心的错误类型
#[derive(Debug, Error)]
pub enum FinderError {
    /// 读写图片目录或特征缓存失败
    #[error("存储读写失败 {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 零向量、非有限值或维度不一致
    #[error("无效的特征向量: {0}")]
    InvalidVector(String),
    /// 图片和特征文件都已存在，这不是内部错误
    #[error("图片已存在: {}", location.display())]
    Conflict { location: PathBuf },
    /// 请求不存在或已过期
    #[error("请求不存在或已过期: {0}")]
    NotFound(String),
    #[error("特征提取失败: {0}")]
    Extraction(String),
    #[error("图片加载失败: {0}")]
    ImageLoad(#[from] image::ImageError),
}

impl FinderError {
    pub fn storage<E>(path: impl AsRef<Path>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Storage { path: path.as_ref().to_path_buf(), source: source.into() }
    }

    /// 用于指标标签的简短名称
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage { .. } => "storage",
            Self::InvalidVector(_) => "invalid_vector",
            Self::Conflict { .. } => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Extraction(_) => "extraction",
            Self::ImageLoad(_) => "image_load",
        }
    }
}

pub type Result<T> = std::result::Result<T, FinderError>;
