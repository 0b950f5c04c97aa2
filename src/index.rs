use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;
use parking_lot::RwLock;

use crate::error::{FinderError, Result};
use crate::fingerprint::Fingerprint;
use crate::similarity::{self, RankOptions, SearchHit};

/// 已发布特征的只读快照，按插入顺序保存
pub type Snapshot = Arc<IndexMap<String, Arc<Fingerprint>>>;

/// 内存中的相似度索引
///
/// 写操作在写锁内以 copy-on-write 的方式替换映射，读操作只在读锁内克隆一次 `Arc`。
/// 因此一次 `rank` 扫描看到的始终是同一个完整快照，不会观察到写到一半的状态。
pub struct SimilarityIndex {
    dimension: usize,
    entries: RwLock<Snapshot>,
}

impl SimilarityIndex {
    /// 创建一个空索引，所有向量的维度必须等于 `dimension`
    pub fn new(dimension: usize) -> Self {
        Self { dimension, entries: RwLock::new(Arc::new(IndexMap::new())) }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 插入或替换一条记录，已有的记录保持原来的位置
    pub fn publish(
        &self,
        identity: impl Into<String>,
        fingerprint: impl Into<Arc<Fingerprint>>,
    ) -> Result<()> {
        let fingerprint = fingerprint.into();
        self.check_dimension(&fingerprint)?;
        let mut lock = self.entries.write();
        Arc::make_mut(&mut *lock).insert(identity.into(), fingerprint);
        Ok(())
    }

    /// 用新的映射整体替换索引
    ///
    /// 先在锁外完成校验和构建，持锁时间只有一次指针交换。
    pub fn replace(&self, entries: IndexMap<String, Fingerprint>) -> Result<()> {
        for fingerprint in entries.values() {
            self.check_dimension(fingerprint)?;
        }
        let entries: IndexMap<_, _> =
            entries.into_iter().map(|(identity, fp)| (identity, Arc::new(fp))).collect();
        *self.entries.write() = Arc::new(entries);
        Ok(())
    }

    /// 删除一条记录，返回记录是否存在
    pub fn remove(&self, identity: &str) -> bool {
        let mut lock = self.entries.write();
        if !lock.contains_key(identity) {
            return false;
        }
        Arc::make_mut(&mut *lock).shift_remove(identity).is_some()
    }

    /// 获取当前映射的快照
    pub fn snapshot(&self) -> Snapshot {
        self.entries.read().clone()
    }

    pub fn get(&self, identity: &str) -> Option<Arc<Fingerprint>> {
        self.entries.read().get(identity).cloned()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.read().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 返回当前已发布的所有图片标识
    pub fn identities(&self) -> HashSet<String> {
        self.snapshot().keys().cloned().collect()
    }

    /// 对所有已发布的向量计算相似度并排序，规则见 [`similarity::rank`]
    pub fn rank(&self, query: &Fingerprint, options: &RankOptions) -> Result<Vec<SearchHit>> {
        self.check_dimension(query)?;
        let snapshot = self.snapshot();
        debug!("在 {} 张图片中搜索", snapshot.len());
        similarity::rank(
            query,
            snapshot.iter().map(|(identity, fp)| (identity.as_str(), fp.as_ref())),
            options,
        )
    }

    fn check_dimension(&self, fingerprint: &Fingerprint) -> Result<()> {
        if fingerprint.dimension() != self.dimension {
            return Err(FinderError::InvalidVector(format!(
                "维度不一致: 期望 {}，实际 {}",
                self.dimension,
                fingerprint.dimension()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::{ScoreParams, calc_similarity};

    fn fp(values: &[f32]) -> Fingerprint {
        Fingerprint::from_vec(values.to_vec()).unwrap()
    }

    #[test]
    fn test_empty_index() {
        let index = SimilarityIndex::new(3);
        let result = index.rank(&fp(&[1., 2., 3.]), &RankOptions::default()).unwrap();
        assert!(result.is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_early_exit_depends_on_insertion_order() {
        let index = SimilarityIndex::new(3);
        let query = fp(&[1., 0., 0.]);
        let first = fp(&[1., 0.6, 0.]);
        let second = fp(&[1., 0.1, 0.]);
        let third = fp(&[1., 0., 0.]);
        index.publish("first.jpg", first.clone()).unwrap();
        index.publish("second.jpg", second.clone()).unwrap();
        index.publish("third.jpg", third.clone()).unwrap();

        let params = ScoreParams::default();
        let s1 = calc_similarity(&query, &first, params).unwrap();
        let s2 = calc_similarity(&query, &second, params).unwrap();
        let s3 = calc_similarity(&query, &third, params).unwrap();
        assert!(s1 < 0.9 && s2 >= 0.9 && s3 > s2);

        let result = index.rank(&query, &RankOptions::default()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].identity, "second.jpg");
        assert_eq!(result[0].score, s2);
    }

    #[test]
    fn test_rank_is_deterministic() {
        let index = SimilarityIndex::new(4);
        for i in 0..20 {
            let v = i as f32;
            index.publish(format!("{i}.png"), fp(&[1., v, v * 0.5, 2.])).unwrap();
        }
        let query = fp(&[1., 3., 1., 2.]);
        let options = RankOptions { max_similarity: None, limit: 10, ..Default::default() };
        let a = index.rank(&query, &options).unwrap();
        let b = index.rank(&query, &options).unwrap();
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_zero_vector_cannot_be_built() {
        // 零向量在构造时就被拒绝，因此不会作为查询进入 rank
        assert!(matches!(
            Fingerprint::from_vec(vec![0., 0.]),
            Err(FinderError::InvalidVector(_))
        ));
    }

    #[test]
    fn test_dimension_checked_at_boundary() {
        let index = SimilarityIndex::new(2);
        assert!(index.publish("a.jpg", fp(&[1., 2., 3.])).is_err());
        assert!(index.rank(&fp(&[1., 2., 3.]), &RankOptions::default()).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_publish_replaces_in_place() {
        let index = SimilarityIndex::new(2);
        index.publish("a.jpg", fp(&[1., 0.])).unwrap();
        index.publish("b.jpg", fp(&[0., 1.])).unwrap();
        index.publish("a.jpg", fp(&[2., 0.])).unwrap();
        let keys: Vec<_> = index.snapshot().keys().cloned().collect();
        assert_eq!(keys, ["a.jpg", "b.jpg"]);
        assert_eq!(index.get("a.jpg").unwrap().values()[0], 2.);
    }

    #[test]
    fn test_snapshot_is_stable() {
        let index = SimilarityIndex::new(2);
        index.publish("a.jpg", fp(&[1., 0.])).unwrap();
        let snapshot = index.snapshot();
        index.publish("b.jpg", fp(&[0., 1.])).unwrap();
        assert!(index.remove("a.jpg"));
        assert!(!index.remove("a.jpg"));
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("a.jpg"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_replace() {
        let index = SimilarityIndex::new(2);
        index.publish("old.jpg", fp(&[1., 0.])).unwrap();
        let mut entries = IndexMap::new();
        entries.insert("new.jpg".to_string(), fp(&[0., 1.]));
        index.replace(entries).unwrap();
        assert!(!index.contains("old.jpg"));
        assert!(index.contains("new.jpg"));
    }
}
