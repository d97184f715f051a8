//! Frame ingestion.
//!
//! `decode` turns an uploaded video into a `VideoSource`: container metadata
//! plus a lazy, finite, single-pass iterator of RGB24 `Frame`s in storage order.
//!
//! Sources:
//! - Synthetic clips (`BSYN1` magic + JSON) rendered in memory, used by tests
//!   (feature: test-fixtures; never accepted by production builds)
//! - Arbitrary containers through FFmpeg (feature: ingest-file-ffmpeg)
//!
//! The ingestion layer MUST NOT keep decoded frames after yielding them, and any
//! spooled upload file is removed when the source is dropped.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(any(test, feature = "test-fixtures"))]
pub mod synthetic;

pub use file::{decode, decodes_containers, VideoMeta, VideoSource};
#[cfg(any(test, feature = "test-fixtures"))]
pub use synthetic::{BallPath, MittPatch, SyntheticClip, SYNTHETIC_MAGIC};
