//! # Parameter Strategy Module
//!
//! Sceglie il prossimo set di parametri a partire dallo storico dei tentativi.
//!
//! ## Responsabilità:
//! - Baseline dal descrittore: livello di default del codec, tipo di contenuto, risoluzione
//! - Passi proporzionali allo scarto dal target (o al surplus oltre lo slack)
//! - Bracketing: il livello successivo resta tra i livelli che hanno passato e
//!   quelli che hanno fallito la qualità
//! - Tentativi falliti: timeout → preset più veloce, errore tool/scoring → livello più sicuro
//! - Non propone mai un fingerprint già provato
//! - GiveUp: tentativi esauriti, convergenza, range esaurito
//!
//! Il "livello" è astratto: più alto = più compressione. In modalità CRF coincide
//! con il CRF, in modalità bitrate determina i kbps rispetto a un bitrate di riferimento.

use crate::config::{Config, RateMode};
use crate::content::{resolution_offset, ContentType};
use crate::types::{
    AttemptOutcome, Codec, EncodeAttempt, EncodeParameters, MediaDescriptor, MediaKind, ParameterFingerprint,
    Preset, QualityThreshold, RateControl,
};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Score change expected from one level step
const LEVEL_SENSITIVITY: f64 = 0.01;
const MAX_LEVEL_STEP: i16 = 4;
/// Surplus above target that is not worth trading for size
const SCORE_SLACK: f64 = 0.02;
const CONVERGENCE_EPSILON: f64 = 0.0025;
const DOWNSCALE_PERCENT: u8 = 75;
/// Bits per pixel per frame used when the source bitrate is unknown
const REFERENCE_BPP: f64 = 0.07;
const MIN_BITRATE_KBPS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    MaxAttempts,
    Converged,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    Try(EncodeParameters),
    GiveUp(GiveUpReason),
}

/// Decides what to try next for one file
pub trait ParameterStrategy: Send + Sync {
    fn next(
        &self,
        history: &[EncodeAttempt],
        descriptor: &MediaDescriptor,
        threshold: &QualityThreshold,
    ) -> NextAction;
}

/// Proportional search with bracketing over the codec's level range
#[derive(Debug, Clone)]
pub struct AdaptiveStrategy {
    pub video_codec: Codec,
    pub image_codec: Codec,
    pub rate_mode: RateMode,
    pub preset: Preset,
    pub max_attempts: usize,
    pub allow_downscale: bool,
    pub content_aware: bool,
}

impl AdaptiveStrategy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            video_codec: config.video_codec,
            image_codec: config.image_codec,
            rate_mode: config.rate_mode,
            preset: config.preset,
            max_attempts: config.max_attempts,
            allow_downscale: config.allow_downscale,
            content_aware: config.content_aware,
        }
    }

    fn codec_for(&self, descriptor: &MediaDescriptor) -> Codec {
        match descriptor.kind {
            MediaKind::Video => self.video_codec,
            MediaKind::Image => self.image_codec,
        }
    }

    /// Starting level for a file
    pub fn baseline_level(&self, descriptor: &MediaDescriptor) -> u8 {
        let codec = self.codec_for(descriptor);
        let (lo, hi) = codec.level_range();
        let mut level = codec.default_level() as i16;

        if !codec.is_image() {
            if self.content_aware {
                level += ContentType::detect(&descriptor.path).level_offset();
            }
            level += resolution_offset(descriptor.height);
        }
        level.clamp(lo as i16, hi as i16) as u8
    }

    fn baseline(&self, descriptor: &MediaDescriptor) -> EncodeParameters {
        let codec = self.codec_for(descriptor);
        let mut flags = BTreeMap::new();
        if self.content_aware && matches!(codec, Codec::H264 | Codec::H265) {
            if let Some(tune) = ContentType::detect(&descriptor.path).tune() {
                flags.insert("tune".to_string(), tune.to_string());
            }
        }
        self.build(descriptor, codec, self.baseline_level(descriptor), 100, self.preset, flags)
    }

    fn build(
        &self,
        descriptor: &MediaDescriptor,
        codec: Codec,
        level: u8,
        scale_percent: u8,
        preset: Preset,
        flags: BTreeMap<String, String>,
    ) -> EncodeParameters {
        let rate_control = if codec.is_image() || self.rate_mode == RateMode::Crf {
            RateControl::Crf(level)
        } else {
            RateControl::BitrateKbps(bitrate_for_level(descriptor, level, scale_percent))
        };
        EncodeParameters {
            codec,
            level,
            rate_control,
            scale_percent,
            preset,
            flags,
        }
    }

    /// Level the last attempt's outcome points to, before bracketing
    fn desired_level(last: &EncodeAttempt, threshold: &QualityThreshold) -> i16 {
        let level = last.parameters.level as i16;
        match &last.outcome {
            AttemptOutcome::Scored { score, .. } if !score.meets(threshold) => {
                level - proportional_step(-score.margin(threshold))
            }
            AttemptOutcome::Scored { score, .. } => {
                let surplus = score.margin(threshold) - SCORE_SLACK;
                if surplus > 0.0 {
                    level + proportional_step(surplus)
                } else {
                    level + 1
                }
            }
            AttemptOutcome::Timeout => level + 1,
            AttemptOutcome::ToolFailure { .. } | AttemptOutcome::ScoringFailed { .. } => level - 1,
        }
    }

    /// Search range `[low, high]` left open by scored attempts at `scale_percent`
    fn bracket(
        history: &[EncodeAttempt],
        scale_percent: u8,
        threshold: &QualityThreshold,
        range: (u8, u8),
    ) -> (i16, i16) {
        let mut low = range.0 as i16;
        let mut high = range.1 as i16;
        for attempt in history.iter().filter(|a| a.parameters.scale_percent == scale_percent) {
            if let AttemptOutcome::Scored { score, .. } = &attempt.outcome {
                let level = attempt.parameters.level as i16;
                if score.meets(threshold) {
                    // Passed quality but was not accepted, so it was too large
                    low = low.max(level + 1);
                } else {
                    high = high.min(level - 1);
                }
            }
        }
        (low, high)
    }

    fn converged(history: &[EncodeAttempt], threshold: &QualityThreshold) -> bool {
        let scored: Vec<_> = history.iter().filter_map(|a| a.score()).collect();
        match scored.as_slice() {
            [.., a, b] => {
                a.metric == b.metric
                    && (a.value - b.value).abs() < CONVERGENCE_EPSILON
                    && !a.meets(threshold)
                    && !b.meets(threshold)
            }
            _ => false,
        }
    }

    /// First untried level in `[low, high]`, starting from `target` and
    /// walking in the preferred direction before the other one
    fn untried_level(
        &self,
        descriptor: &MediaDescriptor,
        template: &EncodeParameters,
        target: i16,
        (low, high): (i16, i16),
        tried: &HashSet<ParameterFingerprint>,
        prefer_up: bool,
    ) -> Option<EncodeParameters> {
        let candidate = |level: i16| {
            let params = self.build(
                descriptor,
                template.codec,
                level as u8,
                template.scale_percent,
                template.preset,
                template.flags.clone(),
            );
            (!tried.contains(&params.fingerprint())).then_some(params)
        };

        let target = target.clamp(low, high);
        let (first, second): (Vec<i16>, Vec<i16>) = if prefer_up {
            ((target..=high).collect(), (low..target).rev().collect())
        } else {
            ((low..=target).rev().collect(), (target + 1..=high).collect())
        };
        first.into_iter().chain(second).find_map(candidate)
    }

    fn downscale(
        &self,
        descriptor: &MediaDescriptor,
        last: &EncodeParameters,
        tried: &HashSet<ParameterFingerprint>,
    ) -> Option<EncodeParameters> {
        if !self.allow_downscale || last.scale_percent <= DOWNSCALE_PERCENT {
            return None;
        }
        let params = self.build(
            descriptor,
            last.codec,
            self.baseline_level(descriptor),
            DOWNSCALE_PERCENT,
            last.preset,
            last.flags.clone(),
        );
        (!tried.contains(&params.fingerprint())).then_some(params)
    }
}

impl ParameterStrategy for AdaptiveStrategy {
    fn next(
        &self,
        history: &[EncodeAttempt],
        descriptor: &MediaDescriptor,
        threshold: &QualityThreshold,
    ) -> NextAction {
        if history.len() >= self.max_attempts {
            return NextAction::GiveUp(GiveUpReason::MaxAttempts);
        }

        let Some(last) = history.last() else {
            return NextAction::Try(self.baseline(descriptor));
        };

        if Self::converged(history, threshold) {
            debug!("Quality converged below target for {}", descriptor.path.display());
            return NextAction::GiveUp(GiveUpReason::Converged);
        }

        let tried: HashSet<ParameterFingerprint> =
            history.iter().map(|a| a.parameters.fingerprint()).collect();
        let params = &last.parameters;

        // Timeouts keep the level and move to a faster preset while one exists
        if last.is_timeout() && !params.codec.is_image() {
            if let Some(faster) = params.preset.faster() {
                let next = self.build(
                    descriptor,
                    params.codec,
                    params.level,
                    params.scale_percent,
                    faster,
                    params.flags.clone(),
                );
                if !tried.contains(&next.fingerprint()) {
                    return NextAction::Try(next);
                }
            }
        }

        let range = params.codec.level_range();
        let (low, high) = Self::bracket(history, params.scale_percent, threshold, range);

        if low <= high {
            let has_pass = low > range.0 as i16;
            let has_fail = high < range.1 as i16;
            let desired = Self::desired_level(last, threshold);
            // With both sides known, bisect and round toward more compression
            let target = if has_pass && has_fail {
                (low + high + 1) / 2
            } else {
                desired
            };
            let prefer_up = desired >= params.level as i16;

            if let Some(next) = self.untried_level(descriptor, params, target, (low, high), &tried, prefer_up) {
                return NextAction::Try(next);
            }
        }

        match self.downscale(descriptor, params, &tried) {
            Some(next) => NextAction::Try(next),
            None => NextAction::GiveUp(GiveUpReason::Exhausted),
        }
    }
}

fn proportional_step(distance: f64) -> i16 {
    // Tolerance keeps float noise (0.95 - 0.93 = 0.0200..02) from adding a step
    let steps = (distance / LEVEL_SENSITIVITY - 1e-9).ceil();
    (steps as i16).clamp(1, MAX_LEVEL_STEP)
}

/// Bitrate for a level: the reference halves every 6 levels above 18
pub fn bitrate_for_level(descriptor: &MediaDescriptor, level: u8, scale_percent: u8) -> u32 {
    let reference_kbps = if descriptor.bitrate > 0 {
        descriptor.bitrate as f64 / 1000.0
    } else {
        let fps = if descriptor.frame_rate > 0.0 {
            descriptor.frame_rate
        } else {
            30.0
        };
        REFERENCE_BPP * descriptor.pixels() as f64 * fps / 1000.0
    };
    let scale = scale_percent as f64 / 100.0;
    let kbps = reference_kbps * 2f64.powf((18.0 - level as f64) / 6.0) * scale * scale;
    kbps.max(MIN_BITRATE_KBPS).round() as u32
}
