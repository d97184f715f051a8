//! Uploaded video source.
//!
//! `VideoSource` dispatches to a concrete decoder chosen from the first bytes
//! of the upload. Decoding is pull-based: a frame is only produced when the
//! pipeline asks for the next one, and re-reading requires a new `decode`.

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegSource;
#[cfg(any(test, feature = "test-fixtures"))]
use super::synthetic::{SyntheticClip, SyntheticSource, SYNTHETIC_MAGIC};
use crate::error::AnalysisError;
use crate::frame::Frame;

/// Container-level facts known before the first frame is decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoMeta {
    /// Nominal playback frame rate reported by the container.
    pub fps: f64,
    /// Frame count estimate from the container (0 when unknown).
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
    /// Playback duration in seconds (0 when unknown).
    pub duration_s: f64,
    /// Capture rate tag written by slow-motion cameras, if present.
    pub capture_fps: Option<f64>,
}

/// Decoded video stream.
pub struct VideoSource {
    backend: VideoBackend,
    meta: VideoMeta,
    frames_decoded: u64,
}

enum VideoBackend {
    #[cfg(any(test, feature = "test-fixtures"))]
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(Box<FfmpegSource>),
}

impl VideoBackend {
    fn meta(&self) -> VideoMeta {
        match *self {
            #[cfg(any(test, feature = "test-fixtures"))]
            VideoBackend::Synthetic(ref source) => source.meta(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            VideoBackend::Ffmpeg(ref source) => source.meta(),
        }
    }

    fn next_frame(&mut self, index: u64) -> anyhow::Result<Option<Frame>> {
        match *self {
            #[cfg(any(test, feature = "test-fixtures"))]
            VideoBackend::Synthetic(ref mut source) => source.next_frame(index),
            #[cfg(feature = "ingest-file-ffmpeg")]
            VideoBackend::Ffmpeg(ref mut source) => source.next_frame(index),
        }
    }
}

/// True when this build can decode real containers (.mp4, .mov, .avi).
pub fn decodes_containers() -> bool {
    cfg!(feature = "ingest-file-ffmpeg")
}

/// Open `bytes` as a video.
///
/// Fails with `EmptyVideo` for an empty upload and `UnreadableVideo` when no
/// decoder accepts the container.
pub fn decode(bytes: &[u8]) -> Result<VideoSource, AnalysisError> {
    if bytes.is_empty() {
        return Err(AnalysisError::EmptyVideo);
    }

    let backend = match open_synthetic(bytes) {
        Some(backend) => backend?,
        None => open_container(bytes)?,
    };

    let meta = backend.meta();
    log::info!(
        "video opened: {}x{} fps={:.3} frames~{} duration={:.2}s capture_fps={:?}",
        meta.width,
        meta.height,
        meta.fps,
        meta.total_frames,
        meta.duration_s,
        meta.capture_fps
    );

    Ok(VideoSource {
        backend,
        meta,
        frames_decoded: 0,
    })
}

/// Synthetic clips are only accepted by fixture builds.
#[cfg(any(test, feature = "test-fixtures"))]
fn open_synthetic(bytes: &[u8]) -> Option<Result<VideoBackend, AnalysisError>> {
    if !bytes.starts_with(SYNTHETIC_MAGIC) {
        return None;
    }
    Some(
        SyntheticClip::from_bytes(bytes)
            .map(|clip| VideoBackend::Synthetic(SyntheticSource::new(clip)))
            .map_err(|e| AnalysisError::UnreadableVideo(format!("{:#}", e))),
    )
}

#[cfg(not(any(test, feature = "test-fixtures")))]
fn open_synthetic(_bytes: &[u8]) -> Option<Result<VideoBackend, AnalysisError>> {
    None
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_container(bytes: &[u8]) -> Result<VideoBackend, AnalysisError> {
    let source = FfmpegSource::open(bytes)
        .map_err(|e| AnalysisError::UnreadableVideo(format!("{:#}", e)))?;
    Ok(VideoBackend::Ffmpeg(Box::new(source)))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_container(_bytes: &[u8]) -> Result<VideoBackend, AnalysisError> {
    Err(AnalysisError::UnreadableVideo(
        "container decoding requires the ingest-file-ffmpeg feature".to_string(),
    ))
}

impl VideoSource {
    pub fn meta(&self) -> &VideoMeta {
        &self.meta
    }

    /// Frames yielded so far.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, AnalysisError> {
        let index = self.frames_decoded;
        let frame = self
            .backend
            .next_frame(index)
            .map_err(|e| AnalysisError::UnreadableVideo(format!("{:#}", e)))?;

        if frame.is_some() {
            self.frames_decoded += 1;
        }
        Ok(frame)
    }
}

impl Iterator for VideoSource {
    type Item = Result<Frame, AnalysisError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::synthetic::BallPath;

    fn clip(frames: u64) -> SyntheticClip {
        SyntheticClip {
            fps: 30.0,
            width: 32,
            height: 24,
            frames,
            capture_fps: None,
            ball: Some(BallPath {
                start: [4, 4],
                step: [2, 0],
                radius: 2,
                first_frame: 0,
                last_frame: frames.saturating_sub(1),
                hidden: vec![],
            }),
            mitt: None,
        }
    }

    #[test]
    fn empty_upload_is_empty_video() {
        assert!(matches!(decode(&[]), Err(AnalysisError::EmptyVideo)));
    }

    #[test]
    fn garbage_is_unreadable() {
        let err = decode(b"definitely not a video").err().unwrap();
        assert!(matches!(err, AnalysisError::UnreadableVideo(_)));
    }

    #[test]
    fn container_support_follows_build_features() {
        let err = decode(b"\x00\x00\x00\x18ftypmp42").err().unwrap();
        if decodes_containers() {
            assert!(matches!(err, AnalysisError::UnreadableVideo(_)));
        } else {
            assert!(err.to_string().contains("ingest-file-ffmpeg"));
        }
    }

    #[test]
    fn oversized_synthetic_clip_is_unreadable() {
        let err = decode(b"BSYN1\n{\"fps\":30.0,\"width\":4294967295,\"height\":4294967295,\"frames\":1}")
            .err()
            .unwrap();
        assert!(matches!(err, AnalysisError::UnreadableVideo(_)));
    }

    #[test]
    fn frames_are_yielded_lazily_in_storage_order() {
        let bytes = clip(3).to_bytes().unwrap();
        let mut source = decode(&bytes).unwrap();
        assert_eq!(source.meta().total_frames, 3);
        assert_eq!(source.frames_decoded(), 0);

        let indices: Vec<u64> = source.by_ref().map(|f| f.unwrap().index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(source.frames_decoded(), 3);
        assert!(source.next().is_none());
    }
}
