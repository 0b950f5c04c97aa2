use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use ndarray::Array1;

use crate::error::{FinderError, Result};
use crate::fingerprint::ContentHash;

/// 特征提取器
///
/// 整个进程只构造一个实例，以 `Arc<dyn FeatureExtractor>` 的形式传给需要它的组件。
/// 对同一张图片的输出必须是确定的，且维度在进程生命周期内保持不变。
pub trait FeatureExtractor: Send + Sync {
    /// 输出向量的维度
    fn dimension(&self) -> usize;

    /// 提取一张图片的特征向量
    fn extract(&self, image: &DynamicImage) -> Result<Array1<f32>>;
}

/// 缩略图特征：将图片缩放到 `side x side` 后直接展开 RGB 像素
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailExtractor {
    side: u32,
}

impl ThumbnailExtractor {
    pub fn new(side: u32) -> Self {
        Self { side: side.max(1) }
    }
}

impl FeatureExtractor for ThumbnailExtractor {
    fn dimension(&self) -> usize {
        (self.side * self.side * 3) as usize
    }

    fn extract(&self, image: &DynamicImage) -> Result<Array1<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(FinderError::Extraction("图片尺寸为 0".to_string()));
        }
        let thumbnail = image.resize_exact(self.side, self.side, FilterType::Triangle).to_rgb8();
        // 像素值整体偏移 1，纯黑图片也不会得到零向量
        let values = thumbnail.as_raw().iter().map(|&p| (p as f32 + 1.) / 256.).collect::<Vec<_>>();
        debug_assert_eq!(values.len(), self.dimension());
        Ok(Array1::from(values))
    }
}

/// 从内存中解码图片
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

/// 从文件读取并解码图片
pub fn load_image_file(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| FinderError::storage(path, e))?;
    decode_image(&bytes)
}

/// 计算解码后 RGB 像素的哈希，同一张图片无论来源和编码格式都得到相同的值
pub fn content_hash(image: &RgbImage) -> ContentHash {
    ContentHash::of_bytes(image.as_raw())
}

/// 将图片编码为入库使用的 JPEG 格式
pub fn encode_canonical(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(vec![]);
    image.write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}
