//! Frames read back from a directory of saved screenshots

use super::{CaptureError, CaptureProcess, load_frame};
use async_trait::async_trait;
use image::GrayImage;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Cycles through the image files of a directory, in file name order
pub struct ReplayCapture {
    dir: PathBuf,
    name: String,
    frames: Vec<PathBuf>,
    next: usize,
    /// Stop after one pass instead of cycling
    once: bool,
}

impl ReplayCapture {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            name: format!("replay:{}", dir.display()),
            dir,
            frames: Vec::new(),
            next: 0,
            once: false,
        }
    }

    /// After the last frame, report the source as gone
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn list_frames(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            })
            .collect();
        frames.sort();
        Ok(frames)
    }
}

#[async_trait]
impl CaptureProcess for ReplayCapture {
    async fn start(&mut self) -> Result<(), CaptureError> {
        let frames = self
            .list_frames()
            .map_err(|e| CaptureError::Spawn(format!("{}: {}", self.dir.display(), e)))?;
        if frames.is_empty() {
            return Err(CaptureError::Spawn(format!(
                "no frames in {}",
                self.dir.display()
            )));
        }

        tracing::info!(dir = %self.dir.display(), frames = frames.len(), "replaying saved frames");
        self.frames = frames;
        self.next = 0;
        Ok(())
    }

    async fn grab_frame(&mut self) -> Result<GrayImage, CaptureError> {
        if self.frames.is_empty() {
            return Err(CaptureError::Crashed("replay not started".to_string()));
        }
        if self.next >= self.frames.len() {
            if self.once {
                return Err(CaptureError::Crashed("replay finished".to_string()));
            }
            self.next = 0;
        }

        let path = self.frames[self.next].clone();
        self.next += 1;
        load_frame(path).await
    }

    async fn stop(&mut self) {
        self.frames.clear();
        self.next = 0;
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[tokio::test]
    async fn test_replay_cycles_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(2, 2, Luma([1])).save(dir.path().join("b.png")).unwrap();
        GrayImage::from_pixel(3, 3, Luma([2])).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut replay = ReplayCapture::new(dir.path());
        replay.start().await.unwrap();
        assert_eq!(replay.frame_count(), 2);

        let sizes: Vec<u32> = [
            replay.grab_frame().await.unwrap(),
            replay.grab_frame().await.unwrap(),
            replay.grab_frame().await.unwrap(),
        ]
        .iter()
        .map(|f| f.width())
        .collect();
        assert_eq!(sizes, vec![3, 2, 3]);
    }

    #[tokio::test]
    async fn test_replay_once_ends_as_crash() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(2, 2, Luma([1])).save(dir.path().join("only.png")).unwrap();

        let mut replay = ReplayCapture::new(dir.path()).once();
        replay.start().await.unwrap();
        replay.grab_frame().await.unwrap();
        let err = replay.grab_frame().await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_directory_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut replay = ReplayCapture::new(dir.path());
        assert!(matches!(replay.start().await, Err(CaptureError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_unreadable_frame_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not an image").unwrap();

        let mut replay = ReplayCapture::new(dir.path());
        replay.start().await.unwrap();
        let err = replay.grab_frame().await.unwrap_err();
        assert!(err.is_transient());
    }
}
