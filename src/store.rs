use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{debug, info, warn};
use ndarray::Array1;
use ndarray_npy::{read_npy, write_npy};
use parking_lot::Mutex;
use rayon::prelude::*;
use regex::Regex;

use crate::error::{FinderError, Result};
use crate::extract::{FeatureExtractor, load_image_file};
use crate::fingerprint::{ContentHash, Fingerprint};
use crate::utils;

/// 加载统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub cached: usize,
    pub computed: usize,
    pub failed: usize,
}

/// 一次目录加载的结果
#[derive(Debug, Default)]
pub struct FeatureSet {
    /// 图片标识到特征向量的映射，按文件名排序
    pub entries: IndexMap<String, Fingerprint>,
    /// 命中缓存的图片数量
    pub cached: usize,
    /// 重新计算特征的图片数量
    pub computed: usize,
    /// 加载或提取失败而被跳过的图片数量
    pub failed: usize,
}

impl FeatureSet {
    pub fn stats(&self) -> LoadStats {
        LoadStats {
            loaded: self.entries.len(),
            cached: self.cached,
            computed: self.computed,
            failed: self.failed,
        }
    }
}

enum Loaded {
    Cached(Fingerprint),
    Computed(Fingerprint),
}

/// 持久化的特征存储
///
/// 图片目录中每张图片 `<name>` 在缓存目录中对应一个 `<name>.npy` 特征文件，
/// 两者使用相同的标识（图片文件名）。
pub struct FeatureStore {
    images_dir: PathBuf,
    cache_dir: PathBuf,
    suffix: Regex,
    persist_lock: Mutex<()>,
}

impl FeatureStore {
    /// 打开存储，目录不存在时会自动创建
    pub fn open(
        images_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        suffix: Regex,
    ) -> Result<Self> {
        let images_dir = images_dir.into();
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&images_dir).map_err(|e| FinderError::storage(&images_dir, e))?;
        fs::create_dir_all(&cache_dir).map_err(|e| FinderError::storage(&cache_dir, e))?;
        Ok(Self { images_dir, cache_dir, suffix, persist_lock: Mutex::new(()) })
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// 新入库图片的标识：内容哈希加固定的 `.jpeg` 后缀
    pub fn identity_for(hash: &ContentHash) -> String {
        format!("{hash}.jpeg")
    }

    pub fn image_path(&self, identity: &str) -> PathBuf {
        self.images_dir.join(identity)
    }

    pub fn cache_path(&self, identity: &str) -> PathBuf {
        self.cache_dir.join(format!("{identity}.npy"))
    }

    /// 列出图片目录下的所有图片
    pub fn list_images(&self) -> Result<Vec<PathBuf>> {
        utils::list_files(&self.images_dir, &self.suffix)
            .map_err(|e| FinderError::storage(&self.images_dir, e))
    }

    /// 当前磁盘上所有图片的标识
    pub fn image_identities(&self) -> Result<BTreeSet<String>> {
        Ok(self.list_images()?.iter().filter_map(|path| utils::file_name(path)).collect())
    }

    /// 加载图片目录中所有图片的特征，见 [`Self::load_or_compute_with_progress`]
    pub fn load_or_compute(&self, extractor: &dyn FeatureExtractor) -> Result<FeatureSet> {
        self.load_or_compute_with_progress(extractor, ProgressBar::hidden())
    }

    /// 加载图片目录中所有图片的特征
    ///
    /// 优先读取缓存；缓存不存在、无法解析或维度不符时重新提取并写回缓存。
    /// 单张图片失败只会被记录并跳过，不影响其他图片。目录无法读取时返回 `Storage` 错误。
    pub fn load_or_compute_with_progress(
        &self,
        extractor: &dyn FeatureExtractor,
        pb: ProgressBar,
    ) -> Result<FeatureSet> {
        let files = self.list_images()?;
        pb.set_length(files.len() as u64);
        debug!("扫描到 {} 张图片: {}", files.len(), self.images_dir.display());

        let loaded = files
            .par_iter()
            .progress_with(pb.clone())
            .filter_map(|path| {
                let identity = utils::file_name(path)?;
                let result = self.load_one(path, &identity, extractor);
                Some((identity, result))
            })
            .collect::<Vec<_>>();

        let mut set = FeatureSet::default();
        for (identity, result) in loaded {
            match result {
                Ok(Loaded::Cached(fp)) => {
                    set.cached += 1;
                    set.entries.insert(identity, fp);
                }
                Ok(Loaded::Computed(fp)) => {
                    set.computed += 1;
                    set.entries.insert(identity, fp);
                }
                Err(e) => {
                    warn!("跳过图片 {identity}: {e}");
                    set.failed += 1;
                }
            }
        }

        pb.finish_with_message("特征加载完成");
        info!(
            "加载 {} 张图片特征，缓存 {}，计算 {}，失败 {}",
            set.entries.len(),
            set.cached,
            set.computed,
            set.failed
        );
        Ok(set)
    }

    fn load_one(
        &self,
        path: &Path,
        identity: &str,
        extractor: &dyn FeatureExtractor,
    ) -> Result<Loaded> {
        let cache_path = self.cache_path(identity);
        if cache_path.is_file() {
            match self.read_cached(identity, extractor.dimension()) {
                Ok(fp) => return Ok(Loaded::Cached(fp)),
                Err(e) => warn!("特征缓存不可用，重新计算 {identity}: {e}"),
            }
        }

        let image = load_image_file(path)?;
        let fingerprint = Fingerprint::new(extractor.extract(&image)?)?;
        if fingerprint.dimension() != extractor.dimension() {
            return Err(FinderError::Extraction(format!(
                "提取器输出维度 {} 与声明的 {} 不一致",
                fingerprint.dimension(),
                extractor.dimension()
            )));
        }

        // 缓存写入失败不影响本次加载，下次会重新计算
        if let Err(e) = self.write_cache(identity, &fingerprint) {
            warn!("写入特征缓存失败 {identity}: {e}");
        }
        Ok(Loaded::Computed(fingerprint))
    }

    /// 读取一张图片的缓存特征，并检查维度
    pub fn read_cached(&self, identity: &str, dimension: usize) -> Result<Fingerprint> {
        let path = self.cache_path(identity);
        let values: Array1<f32> = read_npy(&path).map_err(|e| FinderError::storage(&path, e))?;
        if values.len() != dimension {
            return Err(FinderError::InvalidVector(format!(
                "缓存维度 {} 与期望的 {} 不一致",
                values.len(),
                dimension
            )));
        }
        Fingerprint::new(values)
    }

    fn write_cache(&self, identity: &str, fingerprint: &Fingerprint) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| FinderError::storage(&self.cache_dir, e))?;
        let path = self.cache_path(identity);
        let tmp = tmp_path(&path);
        write_npy(&tmp, fingerprint.values()).map_err(|e| FinderError::storage(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| FinderError::storage(&path, e))?;
        Ok(path)
    }

    /// 持久化一张新图片及其特征
    ///
    /// 图片和特征文件都已存在时返回 `Conflict`，其中带有已存在图片的位置。
    /// 只存在其中一个时会覆盖补全，已有的图片文件会被新编码的内容替换（同一标识的像素内容相同）。
    /// 先写特征再写图片，扫描目录时看到的图片总有可用缓存。
    pub fn persist_one(
        &self,
        identity: &str,
        image_bytes: &[u8],
        fingerprint: &Fingerprint,
    ) -> Result<PathBuf> {
        let _guard = self.persist_lock.lock();

        let image_path = self.image_path(identity);
        if image_path.is_file() && self.cache_path(identity).is_file() {
            return Err(FinderError::Conflict { location: image_path });
        }

        self.write_cache(identity, fingerprint)?;

        fs::create_dir_all(&self.images_dir)
            .map_err(|e| FinderError::storage(&self.images_dir, e))?;
        let tmp = tmp_path(&image_path);
        fs::write(&tmp, image_bytes).map_err(|e| FinderError::storage(&tmp, e))?;
        fs::rename(&tmp, &image_path).map_err(|e| FinderError::storage(&image_path, e))?;

        info!("图片已保存: {}", image_path.display());
        Ok(image_path)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
