use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::extract::{FeatureExtractor, ThumbnailExtractor};
use crate::finder::{FinderConfig, ImageFinder};
use crate::reconcile::ReconcileIntervals;
use crate::similarity::{RankOptions, ScoreParams};
use crate::store::FeatureStore;
use crate::utils::{DEFAULT_SUFFIX, suffix_regex};

static DATA_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    ProjectDirs::from("", "imfinder", "imfinder")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".imfinder"))
});

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 相似度下限，低于该值的结果会被过滤，0 表示不过滤
    #[arg(long, value_name = "SCORE", default_value_t = 0.2)]
    pub min_similarity: f32,
    /// 相似度上限，扫描时遇到第一个不低于该值的图片会直接作为唯一结果返回，0 表示不提前返回
    #[arg(long, value_name = "SCORE", default_value_t = 0.9)]
    pub max_similarity: f32,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 5)]
    pub count: usize,
    /// 余弦距离惩罚系数
    #[arg(long, value_name = "FACTOR", default_value_t = 4.)]
    pub cosine_penalty: f32,
    /// 欧氏距离惩罚系数
    #[arg(long, value_name = "FACTOR", default_value_t = 0.2)]
    pub euclidean_penalty: f32,
    /// 最高分不低于该值时，视为图片已经入库
    #[arg(long, value_name = "SCORE", default_value_t = 0.99)]
    pub exact_threshold: f32,
}

impl SearchOptions {
    pub fn rank_options(&self) -> RankOptions {
        RankOptions {
            min_similarity: Some(self.min_similarity).filter(|&v| v > 0.),
            max_similarity: Some(self.max_similarity).filter(|&v| v > 0.),
            limit: self.count,
            score: ScoreParams {
                cosine_penalty: self.cosine_penalty,
                euclidean_penalty: self.euclidean_penalty,
            },
        }
    }

    pub fn finder_config(&self, request_ttl: Duration) -> FinderConfig {
        FinderConfig { rank: self.rank_options(), exact_threshold: self.exact_threshold, request_ttl }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ReconcileOptions {
    /// 检索结果暂存的有效期，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 3 * 60)]
    pub request_ttl: u64,
    /// 图片目录同步周期，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 2 * 60)]
    pub refresh_interval: u64,
    /// 过期检索结果清理周期，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub sweep_interval: u64,
}

impl ReconcileOptions {
    pub fn request_ttl(&self) -> Duration {
        Duration::from_secs(self.request_ttl)
    }

    pub fn intervals(&self) -> ReconcileIntervals {
        ReconcileIntervals {
            refresh: Duration::from_secs(self.refresh_interval.max(1)),
            sweep: Duration::from_secs(self.sweep_interval.max(1)),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imfinder", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 图片目录，默认为数据目录下的 images
    #[arg(long, value_name = "DIR", env = "IMAGES_DIR_PATH")]
    pub images_dir: Option<PathBuf>,
    /// 特征缓存目录，默认为数据目录下的 cache
    #[arg(long, value_name = "DIR", env = "CACHE_DIR_PATH")]
    pub cache_dir: Option<PathBuf>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 特征提取时缩略图的边长
    #[arg(long, value_name = "N", default_value_t = 16, value_parser = clap::value_parser!(u32).range(1..=256))]
    pub thumbnail_size: u32,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描图片目录，计算并缓存缺失的特征
    Update(UpdateCommand),
    /// 从图片目录中搜索相似图片
    Search(SearchCommand),
    /// 将图片添加到图片目录，已存在的图片会被跳过
    Add(AddCommand),
    /// 在后台持续同步图片目录并清理过期请求
    Daemon(DaemonCommand),
}

impl Opts {
    pub fn images_dir(&self) -> PathBuf {
        self.images_dir.clone().unwrap_or_else(|| DATA_DIR.join("images"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| DATA_DIR.join("cache"))
    }

    /// 构造特征提取器，整个进程只应调用一次
    pub fn extractor(&self) -> Arc<dyn FeatureExtractor> {
        Arc::new(ThumbnailExtractor::new(self.thumbnail_size))
    }

    pub fn open_store(&self) -> Result<FeatureStore> {
        let suffix = suffix_regex(&self.suffix)?;
        Ok(FeatureStore::open(self.images_dir(), self.cache_dir(), suffix)?)
    }

    pub fn open_finder(&self, config: FinderConfig) -> Result<ImageFinder> {
        Ok(ImageFinder::new(self.open_store()?, self.extractor(), config))
    }
}
