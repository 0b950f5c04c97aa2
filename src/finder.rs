use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, RgbImage};
use indicatif::ProgressBar;
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{FinderError, Result};
use crate::extract::{self, FeatureExtractor};
use crate::fingerprint::{ContentHash, Fingerprint};
use crate::index::SimilarityIndex;
use crate::metrics;
use crate::pending::{PendingResultCache, RequestId};
use crate::similarity::{RankOptions, SearchHit};
use crate::store::{FeatureStore, LoadStats};

/// 检索服务的配置
#[derive(Debug, Clone, Copy)]
pub struct FinderConfig {
    /// 未指定时使用的检索参数
    pub rank: RankOptions,
    /// 最高分不低于该值时，认为查询图片已经入库
    pub exact_threshold: f32,
    /// 暂存结果的有效期
    pub request_ttl: Duration,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            rank: RankOptions::default(),
            exact_threshold: 0.99,
            request_ttl: Duration::from_secs(3 * 60),
        }
    }
}

/// 已解码并提取了特征的查询图片
#[derive(Debug, Clone)]
pub struct QueryImage {
    pub image: Arc<RgbImage>,
    pub hash: ContentHash,
    pub fingerprint: Fingerprint,
}

/// 一次检索的结果
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    /// 用于之后提交入库的请求 ID，直接命中已入库图片时为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    pub results: Vec<SearchHit>,
}

/// 一次图片目录同步的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// 磁盘上的图片与索引一致，没有重新加载
    Unchanged,
    Reloaded(LoadStats),
}

/// 图片检索服务
///
/// 持有特征存储、相似度索引和暂存缓存，对外提供检索和提交入库两个操作。
pub struct ImageFinder {
    store: FeatureStore,
    index: SimilarityIndex,
    pending: PendingResultCache,
    /// 入库和整体替换索引互斥，磁盘读写和特征提取在锁外完成
    mutation_lock: Mutex<()>,
    extractor: Arc<dyn FeatureExtractor>,
    config: FinderConfig,
}

impl ImageFinder {
    pub fn new(store: FeatureStore, extractor: Arc<dyn FeatureExtractor>, config: FinderConfig) -> Self {
        let index = SimilarityIndex::new(extractor.dimension());
        Self {
            store,
            index,
            pending: PendingResultCache::new(),
            mutation_lock: Mutex::new(()),
            extractor,
            config,
        }
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn pending(&self) -> &PendingResultCache {
        &self.pending
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// 加载图片目录中的全部图片并发布到索引
    pub fn load_all(&self) -> Result<LoadStats> {
        self.load_all_with_progress(ProgressBar::hidden())
    }

    pub fn load_all_with_progress(&self, pb: ProgressBar) -> Result<LoadStats> {
        // 先在锁外完成磁盘读取和特征提取，再一次性替换索引
        let mut set = self.store.load_or_compute_with_progress(self.extractor.as_ref(), pb)?;
        let stats = set.stats();

        let _guard = self.mutation_lock.lock();
        // 加载期间入库的图片不在本次扫描结果中，保留索引里文件仍然存在的条目
        for (identity, fingerprint) in self.index.snapshot().iter() {
            if !set.entries.contains_key(identity) && self.store.image_path(identity).is_file() {
                debug!("保留加载期间入库的图片: {identity}");
                set.entries.insert(identity.clone(), Fingerprint::clone(fingerprint));
            }
        }
        self.index.replace(set.entries)?;
        metrics::set_indexed_images(self.index.len());
        Ok(stats)
    }

    pub fn query_from_image(&self, image: DynamicImage) -> Result<QueryImage> {
        let fingerprint = Fingerprint::new(self.extractor.extract(&image)?)?;
        let image = image.into_rgb8();
        let hash = extract::content_hash(&image);
        Ok(QueryImage { image: Arc::new(image), hash, fingerprint })
    }

    pub fn query_from_bytes(&self, bytes: &[u8]) -> Result<QueryImage> {
        self.query_from_image(extract::decode_image(bytes)?)
    }

    pub fn query_from_path(&self, path: impl AsRef<Path>) -> Result<QueryImage> {
        self.query_from_image(extract::load_image_file(path)?)
    }

    /// 只排序，不创建暂存记录
    pub fn rank(&self, fingerprint: &Fingerprint, options: &RankOptions) -> Result<Vec<SearchHit>> {
        self.index.rank(fingerprint, options)
    }

    /// 检索一张图片，并暂存结果以便之后提交入库
    pub fn search(&self, query: QueryImage, options: &RankOptions) -> Result<SearchOutcome> {
        let start = std::time::Instant::now();
        let results = self.index.rank(&query.fingerprint, options)?;
        let elapsed = start.elapsed().as_secs_f32();

        let best = results.first();
        let existing = best
            .filter(|hit| hit.score >= self.config.exact_threshold)
            .map(|hit| self.store.image_path(&hit.identity));
        if let Some(path) = &existing {
            debug!("查询图片与已入库图片重复: {}", path.display());
        }

        let request_id =
            self.pending.create(query.image, query.hash, Arc::new(query.fingerprint), existing);

        metrics::observe_search(elapsed, best.map(|hit| hit.score));
        metrics::set_pending_requests(self.pending.len());
        info!("检索完成 {request_id}: {} 个结果，耗时 {:.3}s", results.len(), elapsed);

        Ok(SearchOutcome { request_id: Some(request_id), results })
    }

    /// 将暂存的查询图片入库
    ///
    /// 请求不存在或已过期时返回 `NotFound`；图片已经入库时返回 `Conflict`，其中带有已有图片的位置。
    pub fn commit(&self, request_id: &str) -> Result<PathBuf> {
        let result = self.commit_inner(request_id);
        match &result {
            Ok(_) => metrics::inc_commit("ok"),
            Err(e) => metrics::inc_commit(e.kind()),
        }
        result
    }

    fn commit_inner(&self, request_id: &str) -> Result<PathBuf> {
        let entry = self.pending.get(request_id)?;
        let identity = FeatureStore::identity_for(&entry.content_hash);

        if entry.persisted {
            let location = entry.stored_at.unwrap_or_else(|| self.store.image_path(&identity));
            return Err(FinderError::Conflict { location });
        }

        let bytes = extract::encode_canonical(&entry.image)?;

        let _guard = self.mutation_lock.lock();
        let location = match self.store.persist_one(&identity, &bytes, &entry.fingerprint) {
            Ok(location) => location,
            Err(FinderError::Conflict { location }) => {
                // 文件已存在但可能还没有被同步到索引
                if !self.index.contains(&identity) {
                    self.index.publish(identity, entry.fingerprint)?;
                }
                self.mark_persisted_quietly(request_id, &location);
                return Err(FinderError::Conflict { location });
            }
            Err(e) => return Err(e),
        };

        self.index.publish(identity, entry.fingerprint)?;
        metrics::set_indexed_images(self.index.len());
        self.mark_persisted_quietly(request_id, &location);

        Ok(location)
    }

    fn mark_persisted_quietly(&self, request_id: &str, location: &Path) {
        // 入库期间请求可能刚好过期，文件已经写入，不影响结果
        if let Err(e) = self.pending.mark_persisted(request_id, location.to_path_buf()) {
            debug!("{e}");
        }
    }

    /// 标记下游系统已经公布了该请求的结果
    pub fn mark_published(&self, request_id: &str) -> Result<()> {
        self.pending.mark_published(request_id)
    }

    /// 查询图片本身就是库中的某张图片时，直接返回相似度 1
    pub fn lookup_stored(&self, identity: &str) -> Result<SearchOutcome> {
        let is_plain_name = Path::new(identity).file_name().is_some_and(|name| name == identity);
        if !is_plain_name || !self.store.image_path(identity).is_file() {
            return Err(FinderError::NotFound(identity.to_string()));
        }
        Ok(SearchOutcome {
            request_id: None,
            results: vec![SearchHit { identity: identity.to_string(), score: 1. }],
        })
    }

    /// 同步一次图片目录
    ///
    /// 磁盘上的图片标识集合与索引一致时什么都不做，否则重新加载并整体替换索引。
    /// 与只比较数量相比，还能发现数量不变的替换。替换索引与 `commit` 互斥，加载期间入库的图片不会丢失。
    pub fn refresh(&self) -> Result<RefreshOutcome> {
        let on_disk = self.store.image_identities()?;
        let published = self.index.identities();
        if on_disk.len() == published.len() && on_disk.iter().all(|id| published.contains(id)) {
            debug!("无需更新图片");
            return Ok(RefreshOutcome::Unchanged);
        }

        info!("图片目录有变化（磁盘 {}，索引 {}），重新加载", on_disk.len(), published.len());
        let stats = self.load_all()?;
        info!("已加载 {} 张图片", stats.loaded);
        Ok(RefreshOutcome::Reloaded(stats))
    }

    /// 清理过期或已完成的暂存结果
    pub fn sweep(&self, now: Instant) -> usize {
        let removed = self.pending.sweep(now, self.config.request_ttl);
        let remaining = self.pending.len();
        metrics::inc_sweep_removed(removed);
        metrics::set_pending_requests(remaining);
        if removed > 0 {
            info!("清理了 {removed} 个过期请求（剩余 {remaining} 个）");
        } else {
            debug!("没有需要清理的请求（剩余 {remaining} 个）");
        }
        removed
    }
}
