//! ffmpeg encoder: libx264 / libx265 / libsvtav1 for video, mjpeg / libwebp for images.

use super::{ensure_disk_space, run_encoder_process, scaled_width, EncodeOutcome, EncoderAdapter};
use crate::args;
use crate::error::EncodeError;
use crate::platform::PlatformCommands;
use crate::types::{Codec, EncodeParameters, MediaDescriptor, RateControl};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub struct FfmpegEncoder {
    min_free_space_bytes: u64,
}

impl FfmpegEncoder {
    pub fn new(min_free_space_bytes: u64) -> Self {
        Self { min_free_space_bytes }
    }

    /// Translates parameters into an ffmpeg command line
    pub fn build_args(input: &MediaDescriptor, params: &EncodeParameters, output: &Path) -> Vec<OsString> {
        let mut cmd: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];
        cmd.extend(args!["-loglevel", "error"].into_iter().map(OsString::from));
        cmd.push("-i".into());
        cmd.push(input.path.as_os_str().to_owned());

        let mut codec_args = if params.codec.is_image() {
            Self::image_args(params)
        } else {
            Self::video_args(params, output)
        };

        if params.scale_percent < 100 {
            let width = scaled_width(input.width, params.scale_percent);
            codec_args.extend(args!["-vf", format!("scale={}:-2", width)]);
        }

        cmd.extend(codec_args.into_iter().map(OsString::from));
        cmd.push(output.as_os_str().to_owned());
        cmd
    }

    fn video_args(params: &EncodeParameters, output: &Path) -> Vec<String> {
        let mut out = args!["-map", "0:v:0", "-map", "0:a?", "-map", "0:s?", "-c:a", "copy"];
        out.extend(args!["-c:s", Self::subtitle_codec(output)]);

        match params.codec {
            Codec::H264 => out.extend(args!["-c:v", "libx264", "-preset", params.preset]),
            Codec::H265 => out.extend(args!["-c:v", "libx265", "-preset", params.preset, "-tag:v", "hvc1"]),
            Codec::Av1 => out.extend(args!["-c:v", "libsvtav1", "-preset", params.preset.svt_av1_level()]),
            Codec::Jpeg | Codec::Webp => {}
        }

        match params.rate_control {
            RateControl::Crf(level) => out.extend(args!["-crf", level]),
            RateControl::BitrateKbps(kbps) => out.extend(args!["-b:v", format!("{}k", kbps)]),
        }

        if let Some(tune) = params.flags.get("tune") {
            if matches!(params.codec, Codec::H264 | Codec::H265) {
                out.extend(args!["-tune", tune]);
            } else {
                debug!("Ignoring tune={} for {}", tune, params.codec);
            }
        }
        out
    }

    /// Matroska keeps any subtitle format; the mp4 family only takes text subtitles
    fn subtitle_codec(output: &Path) -> &'static str {
        let is_matroska = output
            .extension()
            .map(|e| e.eq_ignore_ascii_case("mkv"))
            .unwrap_or(false);
        if is_matroska {
            "copy"
        } else {
            "mov_text"
        }
    }

    fn image_args(params: &EncodeParameters) -> Vec<String> {
        let mut out = args!["-frames:v", "1"];
        match params.codec {
            Codec::Jpeg => out.extend(args!["-c:v", "mjpeg", "-q:v", params.level]),
            _ => out.extend(args![
                "-c:v",
                "libwebp",
                "-quality",
                100u8.saturating_sub(params.level)
            ]),
        }
        out
    }
}

#[async_trait]
impl EncoderAdapter for FfmpegEncoder {
    async fn encode(
        &self,
        input: &MediaDescriptor,
        params: &EncodeParameters,
        output: &Path,
        timeout: Duration,
    ) -> Result<EncodeOutcome, EncodeError> {
        ensure_disk_space(output, input.file_size, self.min_free_space_bytes)?;

        let program = PlatformCommands::instance().get_command("ffmpeg");
        let cmd = Self::build_args(input, params, output);
        run_encoder_process(program, cmd, output, timeout).await
    }
}
