//! Uploaded video decoding using FFmpeg.
//!
//! The upload is spooled to a private temporary file because libavformat reads
//! from paths. The file is removed when the source is dropped. Frames are
//! scaled to RGB24 and yielded one at a time.

use std::io::Write;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use tempfile::NamedTempFile;

use super::file::VideoMeta;
use crate::frame::Frame;

/// Metadata key Android writes for slow-motion captures.
const CAPTURE_FPS_KEY: &str = "com.android.capture.fps";
const AV_TIME_BASE: f64 = 1_000_000.0;

pub(crate) struct FfmpegSource {
    // Held for its Drop: the spool file lives exactly as long as the decoder.
    _spool: NamedTempFile,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    meta: VideoMeta,
    eof_sent: bool,
}

impl FfmpegSource {
    pub(crate) fn open(bytes: &[u8]) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;

        let mut spool = NamedTempFile::new().context("create upload spool file")?;
        spool.write_all(bytes).context("write upload spool file")?;
        spool.flush().context("flush upload spool file")?;

        let input = ffmpeg::format::input(spool.path())
            .context("failed to open video container with ffmpeg")?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();

        let rate = input_stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            f64::from(rate)
        } else {
            0.0
        };
        let stream_tag = input_stream
            .metadata()
            .get(CAPTURE_FPS_KEY)
            .map(str::to_string);
        let container_tag = input.metadata().get(CAPTURE_FPS_KEY).map(str::to_string);
        let capture_fps = stream_tag
            .or(container_tag)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value > 0.0);
        let total_frames = input_stream.frames().max(0) as u64;
        let duration_s = (input.duration().max(0) as f64) / AV_TIME_BASE;

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let meta = VideoMeta {
            fps,
            total_frames,
            width: decoder.width(),
            height: decoder.height(),
            duration_s,
            capture_fps,
        };

        Ok(Self {
            _spool: spool,
            input,
            stream_index,
            decoder,
            scaler,
            meta,
            eof_sent: false,
        })
    }

    pub(crate) fn meta(&self) -> VideoMeta {
        self.meta.clone()
    }

    pub(crate) fn next_frame(&mut self, index: u64) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded, index).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }

            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder
                        .send_eof()
                        .context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == stream_index)
            .map(|(_, packet)| packet)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video, index: u64) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Frame::new(pixels, width, height, index)
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0) as usize;
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
