//! Broadcast media pool: image and video files from two folders.

use rand::Rng;
use rand::seq::SliceRandom;
use relaycast_core::types::MediaKind;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];

#[derive(Debug, Clone, Default)]
pub struct MediaPool {
    images: Vec<PathBuf>,
    videos: Vec<PathBuf>,
}

impl MediaPool {
    pub fn new(images: Vec<PathBuf>, videos: Vec<PathBuf>) -> Self {
        Self { images, videos }
    }

    /// List both folders. A missing folder contributes nothing.
    pub fn scan(images_dir: &Path, videos_dir: &Path) -> Self {
        let pool = Self {
            images: list_files(images_dir, IMAGE_EXTENSIONS),
            videos: list_files(videos_dir, VIDEO_EXTENSIONS),
        };
        tracing::debug!(
            "🖼️ Media pool: {} image(s), {} video(s)",
            pool.images.len(),
            pool.videos.len()
        );
        pool
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn video_count(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.videos.is_empty()
    }

    /// Coin flip between image and video, falling back to whichever pool
    /// has files.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(PathBuf, MediaKind)> {
        let want_image = rng.gen_bool(0.5);
        let (first, second) = if want_image {
            ((&self.images, MediaKind::Image), (&self.videos, MediaKind::Video))
        } else {
            ((&self.videos, MediaKind::Video), (&self.images, MediaKind::Image))
        };
        for (pool, kind) in [first, second] {
            if let Some(path) = pool.choose(rng) {
                return Some((path.clone(), kind));
            }
        }
        None
    }
}

fn list_files(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("⚠️ Media folder {} unreadable: {e}", dir.display());
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}
