//! Video file and network stream source using FFmpeg.
//!
//! Decodes the best video track to RGB24 in memory. End of input is a clean
//! end of stream once the decoder has been flushed; a decoder error is a read
//! failure.

use ffmpeg_next as ffmpeg;

use super::{FrameSource, SourceStats};
use crate::error::PipelineError;
use crate::frame::Frame;

/// Demux/decode stages as seen by the frame pump.
trait PacketPipeline {
    type Picture;

    /// A decoded picture if the decoder has one ready.
    fn receive(&mut self) -> Option<Self::Picture>;

    /// Send the next packet of the selected track. `false` once input is exhausted.
    fn feed(&mut self) -> Result<bool, String>;

    /// Signal end of input so buffered pictures are released.
    fn finish(&mut self) -> Result<(), String>;
}

/// Next picture, feeding packets as needed and flushing the decoder when the
/// input runs out. `flushed` tracks whether EOF has been sent.
fn next_picture<P: PacketPipeline>(
    pipeline: &mut P,
    flushed: &mut bool,
) -> Result<Option<P::Picture>, String> {
    loop {
        if let Some(picture) = pipeline.receive() {
            return Ok(Some(picture));
        }
        if *flushed {
            return Ok(None);
        }
        if !pipeline.feed()? {
            pipeline.finish()?;
            *flushed = true;
        }
    }
}

struct DecodeState {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

impl PacketPipeline for DecodeState {
    type Picture = ffmpeg::frame::Video;

    fn receive(&mut self) -> Option<ffmpeg::frame::Video> {
        let mut decoded = ffmpeg::frame::Video::empty();
        self.decoder.receive_frame(&mut decoded).ok().map(|_| decoded)
    }

    fn feed(&mut self) -> Result<bool, String> {
        let index = self.stream_index;
        let Some((_, packet)) = self
            .input
            .packets()
            .find(|(stream, _)| stream.index() == index)
        else {
            return Ok(false);
        };
        self.decoder
            .send_packet(&packet)
            .map_err(|err| format!("send packet to ffmpeg decoder: {err}"))?;
        Ok(true)
    }

    fn finish(&mut self) -> Result<(), String> {
        self.decoder
            .send_eof()
            .map_err(|err| format!("flush ffmpeg decoder: {err}"))
    }
}

pub struct FfmpegSource {
    location: String,
    state: Option<DecodeState>,
    flushed: bool,
    frame_count: u64,
}

impl FfmpegSource {
    pub fn open(location: &str) -> Result<Self, PipelineError> {
        let unavailable =
            |what: &str, err: ffmpeg::Error| PipelineError::ResourceUnavailable(format!("{what} '{location}': {err}"));

        ffmpeg::init().map_err(|e| unavailable("initialize ffmpeg for", e))?;
        let input = ffmpeg::format::input(&location).map_err(|e| unavailable("open", e))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| PipelineError::ResourceUnavailable(format!("'{location}' has no video track")))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| unavailable("load video decoder parameters for", e))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| unavailable("open ffmpeg video decoder for", e))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| unavailable("create ffmpeg scaler for", e))?;

        log::info!(
            "FfmpegSource: opened {} ({}x{})",
            location,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            location: location.to_string(),
            state: Some(DecodeState {
                input,
                stream_index,
                decoder,
                scaler,
            }),
            flushed: false,
            frame_count: 0,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn describe(&self) -> String {
        format!("ffmpeg:{}", self.location)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };

        let outcome = next_picture(state, &mut self.flushed).and_then(|picture| {
            let Some(decoded) = picture else {
                return Ok(None);
            };
            let mut rgb_frame = ffmpeg::frame::Video::empty();
            state
                .scaler
                .run(&decoded, &mut rgb_frame)
                .map_err(|err| format!("scale frame to RGB: {err}"))?;
            frame_to_pixels(&rgb_frame).map(Some)
        });

        match outcome {
            Ok(Some((pixels, width, height))) => {
                self.frame_count += 1;
                Frame::from_rgb(pixels, width, height, self.frame_count).map(Some)
            }
            Ok(None) => {
                log::info!("FfmpegSource: end of input {}", self.location);
                Ok(None)
            }
            Err(message) => Err(PipelineError::TransientReadFailure(message)),
        }
    }

    fn release(&mut self) {
        self.state = None;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            descriptor: self.describe(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32), String> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .ok_or_else(|| "ffmpeg frame row is out of bounds".to_string())?,
        );
    }
    Ok((pixels, width, height))
}
