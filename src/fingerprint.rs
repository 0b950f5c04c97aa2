use std::fmt;

use ndarray::Array1;

use crate::error::{FinderError, Result};

/// 图片的特征向量
///
/// 创建后不可修改。构造时会检查向量非空、全部为有限值且范数不为零，
/// 因此通过校验的向量在计算余弦相似度时不会出现除零。
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    values: Array1<f32>,
    norm: f64,
}

impl Fingerprint {
    pub fn new(values: Array1<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(FinderError::InvalidVector("向量为空".to_string()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FinderError::InvalidVector("向量包含 NaN 或无穷值".to_string()));
        }
        let norm = values.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt();
        if norm == 0. {
            return Err(FinderError::InvalidVector("向量范数为零".to_string()));
        }
        Ok(Self { values, norm })
    }

    pub fn from_vec(values: Vec<f32>) -> Result<Self> {
        Self::new(Array1::from(values))
    }

    pub fn values(&self) -> &Array1<f32> {
        &self.values
    }

    pub fn norm(&self) -> f64 {
        self.norm
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// 解码后图片像素的 blake3 哈希，十六进制表示
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
