//! Output format of converted segments and thumbnails.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Thumbnails are scaled to this width, keeping the aspect ratio.
pub const THUMBNAIL_SCALE_WIDTH: u32 = 320;
/// Frame the thumbnail is taken from.
pub const THUMBNAIL_TIMESTAMP: &str = "00:00:01";

/// Encoder settings applied to every segment. Every segment of one video must
/// be converted with the same settings or the stream-copy concat breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EncodingConfig {
    pub codec: String,
    pub preset: String,
    /// 0-51, lower is better.
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}
