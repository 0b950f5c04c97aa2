use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("im_finder_search_count", "count of the image to search").unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("im_finder_search_duration", "duration of the ranking scan in seconds")
        .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "im_finder_search_max_score",
        "best score of the per-image search",
        (1..=20).map(|x| x as f64 * 0.05).collect()
    )
    .unwrap()
});

static METRIC_COMMIT_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("im_finder_commit_count", "count of commit outcomes", &["result"])
        .unwrap()
});

static METRIC_REFRESH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "im_finder_refresh_count",
        "count of image reconciliation cycles",
        &["result"]
    )
    .unwrap()
});

static METRIC_SWEEP_REMOVED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("im_finder_sweep_removed", "count of swept pending requests").unwrap()
});

static METRIC_INDEXED_IMAGES: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("im_finder_indexed_images", "number of published images").unwrap()
});

static METRIC_PENDING_REQUESTS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("im_finder_pending_requests", "number of pending requests").unwrap()
});

/// 记录一次检索的耗时和最高分
pub fn observe_search(duration: f32, max_score: Option<f32>) {
    METRIC_SEARCH_COUNT.inc();
    METRIC_SEARCH_DURATION.observe(duration as f64);
    if let Some(score) = max_score {
        METRIC_SEARCH_MAX_SCORE.observe(score as f64);
    }
}

/// `result` 为 `ok` 或错误类型名
pub fn inc_commit(result: &str) {
    METRIC_COMMIT_COUNT.with_label_values(&[result]).inc();
}

/// `result` 为 `unchanged`、`reloaded` 或 `error`
pub fn inc_refresh(result: &str) {
    METRIC_REFRESH_COUNT.with_label_values(&[result]).inc();
}

pub fn inc_sweep_removed(count: usize) {
    METRIC_SWEEP_REMOVED.inc_by(count as u64);
}

pub fn set_indexed_images(count: usize) {
    METRIC_INDEXED_IMAGES.set(count as i64);
}

pub fn set_pending_requests(count: usize) {
    METRIC_PENDING_REQUESTS.set(count as i64);
}
