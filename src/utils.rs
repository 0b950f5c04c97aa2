use std::path::{Path, PathBuf};

use indicatif::ProgressStyle;
use regex::Regex;
use walkdir::WalkDir;

/// 默认扫描的图片后缀名
pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png";

/// 将逗号分隔的后缀名列表转换为不区分大小写的正则表达式
pub fn suffix_regex(suffix: &str) -> Result<Regex, regex::Error> {
    let alternatives = suffix
        .split(',')
        .map(|s| s.trim().trim_start_matches('.'))
        .filter(|s| !s.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)^({alternatives})$"))
}

/// 列出目录下（不递归）后缀名匹配的文件，按文件名排序
pub fn list_files(dir: &Path, suffix: &Regex) -> walkdir::Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if suffix.is_match(&ext.to_string_lossy()) {
                files.push(path.to_path_buf());
            }
        }
    }
    files.sort_unstable();
    Ok(files)
}

/// 文件名，作为图片的标识使用
pub fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .expect("invalid progress template")
        .progress_chars("##-")
}
