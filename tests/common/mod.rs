#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};

use image::{DynamicImage, Rgb, RgbImage};
use imfinder::error::Result;
use imfinder::extract::{FeatureExtractor, ThumbnailExtractor};
use imfinder::store::FeatureStore;
use imfinder::utils::{DEFAULT_SUFFIX, suffix_regex};
use ndarray::Array1;
use parking_lot::Mutex;

/// 记录调用次数的提取器
pub struct CountingExtractor {
    inner: ThumbnailExtractor,
    calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn new() -> Self {
        Self { inner: ThumbnailExtractor::new(16), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeatureExtractor for CountingExtractor {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn extract(&self, image: &DynamicImage) -> Result<Array1<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.extract(image)
    }
}

/// 第一次提取时阻塞，直到测试放行
pub struct GatedExtractor {
    inner: ThumbnailExtractor,
    armed: AtomicBool,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl GatedExtractor {
    /// 返回提取器、进入阻塞的通知和放行的发送端
    pub fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        let extractor = Self {
            inner: ThumbnailExtractor::new(16),
            armed: AtomicBool::new(true),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (extractor, entered_rx, release_tx)
    }
}

impl FeatureExtractor for GatedExtractor {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn extract(&self, image: &DynamicImage) -> Result<Array1<f32>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv();
        }
        self.inner.extract(image)
    }
}

/// 第一次提取时 panic
pub struct PanicOnceExtractor {
    inner: ThumbnailExtractor,
    armed: AtomicBool,
}

impl PanicOnceExtractor {
    pub fn new() -> Self {
        Self { inner: ThumbnailExtractor::new(16), armed: AtomicBool::new(true) }
    }
}

impl FeatureExtractor for PanicOnceExtractor {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn extract(&self, image: &DynamicImage) -> Result<Array1<f32>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("extractor crashed");
        }
        self.inner.extract(image)
    }
}

/// 按种子生成互不相似的测试图片：两种互补颜色组成的 4x4 棋盘格
pub fn pattern(seed: u32) -> RgbImage {
    let a = [(seed * 53 % 256) as u8, (seed * 97 % 256) as u8, (seed * 151 % 256) as u8];
    let b = a.map(|c| 255 - c);
    RgbImage::from_fn(32, 32, |x, y| {
        if (x / 8 + y / 8 + seed) % 2 == 0 { Rgb(a) } else { Rgb(b) }
    })
}

pub fn save_pattern(path: impl AsRef<Path>, seed: u32) {
    pattern(seed).save(path).unwrap();
}

pub fn open_store(root: &Path) -> FeatureStore {
    FeatureStore::open(
        root.join("images"),
        root.join("cache"),
        suffix_regex(DEFAULT_SUFFIX).unwrap(),
    )
    .unwrap()
}
