//! 复合相似度评分
//!
//! 评分由余弦距离和欧氏距离两部分组成：
//!
//! ```text
//! adj_cosine    = exp(-cosine_penalty * (1 - cos(a, b)))
//! adj_euclidean = 1 / (1 + euclidean_penalty * |a - b|)
//! score         = (adj_cosine + adj_euclidean) / 2
//! ```
//!
//! 结果落在 (0, 1] 区间，完全相同的向量得分为 1。

use ndarray::Zip;
use serde::Serialize;

use crate::error::{FinderError, Result};
use crate::fingerprint::Fingerprint;

/// 评分公式中的两个惩罚系数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreParams {
    pub cosine_penalty: f32,
    pub euclidean_penalty: f32,
}

impl Default for ScoreParams {
    /// 检索时使用的默认值，欧氏惩罚系数为 0.2
    fn default() -> Self {
        Self { cosine_penalty: 4., euclidean_penalty: 0.2 }
    }
}

/// 一次排序查询的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankOptions {
    /// 低于该分数的条目直接跳过，None 表示不过滤
    pub min_similarity: Option<f32>,
    /// 遇到的第一个不低于该分数的条目会立即作为唯一结果返回，None 表示不提前结束
    pub max_similarity: Option<f32>,
    /// 最多返回的结果数量
    pub limit: usize,
    pub score: ScoreParams,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            min_similarity: Some(0.2),
            max_similarity: Some(0.9),
            limit: 5,
            score: ScoreParams::default(),
        }
    }
}

/// 单条检索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// 图片标识，即图片文件名
    pub identity: String,
    /// 相似度，范围 (0, 1]
    pub score: f32,
}

/// 计算两个特征向量的复合相似度
pub fn calc_similarity(a: &Fingerprint, b: &Fingerprint, params: ScoreParams) -> Result<f32> {
    if a.dimension() != b.dimension() {
        return Err(FinderError::InvalidVector(format!(
            "维度不一致: {} != {}",
            a.dimension(),
            b.dimension()
        )));
    }

    let (dot, squared_distance) = Zip::from(a.values()).and(b.values()).fold(
        (0f64, 0f64),
        |(dot, dis), &x, &y| {
            let (x, y) = (x as f64, y as f64);
            (dot + x * y, dis + (x - y) * (x - y))
        },
    );

    // 浮点误差可能让余弦值略微超出 [-1, 1]
    let cosine_similarity = (dot / (a.norm() * b.norm())).clamp(-1., 1.);
    let cosine_distance = 1. - cosine_similarity;
    let euclidean_distance = squared_distance.sqrt();

    let adj_cosine = (-(params.cosine_penalty as f64) * cosine_distance).exp();
    let adj_euclidean = 1. / (1. + params.euclidean_penalty as f64 * euclidean_distance);

    Ok(((adj_cosine + adj_euclidean) / 2.) as f32)
}

/// 按迭代顺序扫描候选向量并排序
///
/// 扫描顺序就是 `candidates` 的顺序：第一个达到 `max_similarity` 的条目会直接结束扫描，
/// 即使后面还有分数更高的条目，也只返回这一条（先到的近似重复图片优先）。
/// 没有触发提前结束时，所有通过 `min_similarity` 的条目按分数降序排列并截断到 `limit`。
pub fn rank<'a, I>(query: &Fingerprint, candidates: I, options: &RankOptions) -> Result<Vec<SearchHit>>
where
    I: IntoIterator<Item = (&'a str, &'a Fingerprint)>,
{
    let mut results = vec![];

    for (identity, vector) in candidates {
        let score = calc_similarity(query, vector, options.score)?;

        if let Some(min) = options.min_similarity {
            if score < min {
                continue;
            }
        }

        if let Some(max) = options.max_similarity {
            if score >= max {
                return Ok(vec![SearchHit { identity: identity.to_owned(), score }]);
            }
        }

        results.push(SearchHit { identity: identity.to_owned(), score });
    }

    // 稳定排序，同分时保持插入顺序
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(options.limit);

    Ok(results)
}
