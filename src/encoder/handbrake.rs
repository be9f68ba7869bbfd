//! HandBrakeCLI encoder (video only). Audio tracks are passed through.

use super::{ensure_disk_space, run_encoder_process, scaled_width, EncodeOutcome, EncoderAdapter};
use crate::args;
use crate::error::EncodeError;
use crate::platform::PlatformCommands;
use crate::types::{Codec, EncodeParameters, MediaDescriptor, RateControl};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

pub struct HandBrakeEncoder {
    min_free_space_bytes: u64,
}

impl HandBrakeEncoder {
    pub fn new(min_free_space_bytes: u64) -> Self {
        Self { min_free_space_bytes }
    }

    fn encoder_name(codec: Codec) -> &'static str {
        match codec {
            Codec::H264 => "x264",
            Codec::Av1 => "svt_av1",
            _ => "x265",
        }
    }

    pub fn build_args(input: &MediaDescriptor, params: &EncodeParameters, output: &Path) -> Vec<OsString> {
        let mut cmd: Vec<OsString> = vec![
            "-i".into(),
            input.path.as_os_str().to_owned(),
            "-o".into(),
            output.as_os_str().to_owned(),
        ];

        let preset = match params.codec {
            Codec::Av1 => params.preset.svt_av1_level().to_string(),
            _ => params.preset.to_string(),
        };
        let mut rest = args![
            "--encoder",
            Self::encoder_name(params.codec),
            "--encoder-preset",
            preset
        ];

        match params.rate_control {
            RateControl::Crf(level) => rest.extend(args!["--quality", level]),
            RateControl::BitrateKbps(kbps) => rest.extend(args!["--vb", kbps]),
        }

        if let Some(tune) = params.flags.get("tune") {
            if params.codec != Codec::Av1 {
                rest.extend(args!["--encoder-tune", tune]);
            }
        }

        if params.scale_percent < 100 {
            rest.extend(args!["--width", scaled_width(input.width, params.scale_percent)]);
        }

        rest.extend(args!["--aencoder", "copy", "--all-audio"]);
        rest.extend(args!["--all-subtitles", "--subtitle", "scan", "--subtitle-burned=none"]);
        cmd.extend(rest.into_iter().map(OsString::from));
        cmd
    }
}

#[async_trait]
impl EncoderAdapter for HandBrakeEncoder {
    async fn encode(
        &self,
        input: &MediaDescriptor,
        params: &EncodeParameters,
        output: &Path,
        timeout: Duration,
    ) -> Result<EncodeOutcome, EncodeError> {
        if params.codec.is_image() {
            return Ok(EncodeOutcome::ToolFailure {
                exit_code: None,
                diagnostic: format!("HandBrakeCLI cannot encode {} images", params.codec),
            });
        }

        ensure_disk_space(output, input.file_size, self.min_free_space_bytes)?;

        let program = PlatformCommands::instance().get_command("HandBrakeCLI");
        let cmd = Self::build_args(input, params, output);
        run_encoder_process(program, cmd, output, timeout).await
    }
}
