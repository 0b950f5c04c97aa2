use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use log::debug;
use parking_lot::Mutex;
use rand::distr::{Alphanumeric, SampleString};
use tokio::time::Instant;

use crate::error::{FinderError, Result};
use crate::fingerprint::{ContentHash, Fingerprint};

/// 请求 ID，调用方只持有这个 ID
pub type RequestId = String;

/// 一次检索之后、入库之前的暂存结果
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub request_id: RequestId,
    pub created_at: Instant,
    /// 解码后的查询图片
    pub image: Arc<RgbImage>,
    pub content_hash: ContentHash,
    pub fingerprint: Arc<Fingerprint>,
    /// 图片和特征已经写入存储
    pub persisted: bool,
    /// 下游系统已经对外公布了结果
    pub published: bool,
    /// 已入库图片的位置
    pub stored_at: Option<PathBuf>,
}

impl PendingEntry {
    /// 两个标记都已设置，下一次清理时会被移除
    pub fn is_complete(&self) -> bool {
        self.persisted && self.published
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }
}

/// 暂存检索结果的缓存
///
/// 所有条目由缓存独占，`get` 返回的是克隆，调用方不会跨调用持有内部引用。
#[derive(Default)]
pub struct PendingResultCache {
    entries: Mutex<HashMap<RequestId, PendingEntry>>,
}

impl PendingResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一条新记录
    ///
    /// `existing` 不为空表示查询图片与已入库图片完全重复，
    /// 此时条目创建时就已经是 persisted 和 published 状态，无需调用方再做任何操作。
    pub fn create(
        &self,
        image: Arc<RgbImage>,
        content_hash: ContentHash,
        fingerprint: Arc<Fingerprint>,
        existing: Option<PathBuf>,
    ) -> RequestId {
        self.create_at(Instant::now(), image, content_hash, fingerprint, existing)
    }

    pub fn create_at(
        &self,
        now: Instant,
        image: Arc<RgbImage>,
        content_hash: ContentHash,
        fingerprint: Arc<Fingerprint>,
        existing: Option<PathBuf>,
    ) -> RequestId {
        let mut entries = self.entries.lock();
        let request_id = loop {
            let id = Alphanumeric.sample_string(&mut rand::rng(), 32);
            if !entries.contains_key(&id) {
                break id;
            }
        };
        let exact = existing.is_some();
        entries.insert(request_id.clone(), PendingEntry {
            request_id: request_id.clone(),
            created_at: now,
            image,
            content_hash,
            fingerprint,
            persisted: exact,
            published: exact,
            stored_at: existing,
        });
        request_id
    }

    pub fn get(&self, request_id: &str) -> Result<PendingEntry> {
        self.entries
            .lock()
            .get(request_id)
            .cloned()
            .ok_or_else(|| FinderError::NotFound(request_id.to_string()))
    }

    /// 标记为已入库，可重复调用
    pub fn mark_persisted(&self, request_id: &str, location: PathBuf) -> Result<()> {
        self.update(request_id, |entry| {
            entry.persisted = true;
            entry.stored_at.get_or_insert(location);
        })
    }

    /// 标记为已公布，可重复调用
    pub fn mark_published(&self, request_id: &str) -> Result<()> {
        self.update(request_id, |entry| entry.published = true)
    }

    fn update(&self, request_id: &str, f: impl FnOnce(&mut PendingEntry)) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(request_id)
            .ok_or_else(|| FinderError::NotFound(request_id.to_string()))?;
        f(entry);
        if entry.is_complete() {
            debug!("请求 {request_id} 已完成，等待清理");
        }
        Ok(())
    }

    /// 清理过期或已完成的条目，返回清理的数量
    pub fn sweep(&self, now: Instant, ttl: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_complete() && !entry.is_expired(now, ttl));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(180);

    fn create(cache: &PendingResultCache, now: Instant, existing: Option<PathBuf>) -> RequestId {
        let image = Arc::new(RgbImage::new(2, 2));
        let fp = Arc::new(Fingerprint::from_vec(vec![1., 2., 3.]).unwrap());
        cache.create_at(now, image, ContentHash::of_bytes(b"x"), fp, existing)
    }

    #[test]
    fn test_ttl_sweep() {
        let cache = PendingResultCache::new();
        let t0 = Instant::now();
        let id = create(&cache, t0, None);
        cache.mark_persisted(&id, PathBuf::from("a.jpeg")).unwrap();

        assert_eq!(cache.sweep(t0 + Duration::from_secs(179), TTL), 0);
        assert!(cache.get(&id).is_ok());

        assert_eq!(cache.sweep(t0 + Duration::from_secs(181), TTL), 1);
        assert!(matches!(cache.get(&id), Err(FinderError::NotFound(_))));
    }

    #[test]
    fn test_dual_flag_removal() {
        let cache = PendingResultCache::new();
        let t0 = Instant::now();
        let done = create(&cache, t0, None);
        let half = create(&cache, t0, None);

        cache.mark_persisted(&done, PathBuf::from("a.jpeg")).unwrap();
        cache.mark_published(&done).unwrap();
        cache.mark_published(&half).unwrap();

        assert_eq!(cache.sweep(t0 + Duration::from_secs(1), TTL), 1);
        assert!(cache.get(&done).is_err());
        assert!(cache.get(&half).is_ok());
    }

    #[test]
    fn test_exact_duplicate_created_complete() {
        let cache = PendingResultCache::new();
        let t0 = Instant::now();
        let id = create(&cache, t0, Some(PathBuf::from("old.jpeg")));
        let entry = cache.get(&id).unwrap();
        assert!(entry.persisted && entry.published);
        assert_eq!(entry.stored_at, Some(PathBuf::from("old.jpeg")));
        assert_eq!(cache.sweep(t0, TTL), 1);
    }

    #[test]
    fn test_marks_are_idempotent() {
        let cache = PendingResultCache::new();
        let id = create(&cache, Instant::now(), None);
        cache.mark_persisted(&id, PathBuf::from("a.jpeg")).unwrap();
        cache.mark_persisted(&id, PathBuf::from("b.jpeg")).unwrap();
        cache.mark_published(&id).unwrap();
        cache.mark_published(&id).unwrap();
        let entry = cache.get(&id).unwrap();
        assert!(entry.is_complete());
        assert_eq!(entry.stored_at, Some(PathBuf::from("a.jpeg")));
    }

    #[test]
    fn test_unknown_request() {
        let cache = PendingResultCache::new();
        assert!(matches!(cache.get("nope"), Err(FinderError::NotFound(_))));
        assert!(matches!(cache.mark_published("nope"), Err(FinderError::NotFound(_))));
        assert!(cache.mark_persisted("nope", PathBuf::new()).is_err());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let cache = PendingResultCache::new();
        let now = Instant::now();
        let ids: std::collections::HashSet<_> = (0..100).map(|_| create(&cache, now, None)).collect();
        assert_eq!(ids.len(), 100);
        assert_eq!(cache.len(), 100);
    }
}
