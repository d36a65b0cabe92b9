//! Video transcoding pipeline model.
//!
//! Folder state lives entirely in the staging area as marker files, so every
//! type here is either a naming rule or a payload exchanged over RPC.

use serde::{Deserialize, Serialize};

use crate::codec::base64_bytes;

/// Staging prefix holding uploads and pre-conversion segments.
pub const MEDIA_CONVERT_DIR: &str = "media_convert";
/// Staging prefix holding converted segments and final outputs.
pub const MEDIA_CONVERTED_DIR: &str = "media_converted";
/// Segment-count marker written when a folder is split.
pub const SEGMENTS_MANIFEST: &str = "segments.json";
/// Per-folder marker that prevents re-splitting.
pub const SPLIT_MARKER: &str = "split.txt";
/// Ordered segment list consumed by the concatenation tool.
pub const CONCAT_MANIFEST: &str = "concat.txt";
/// Extension of converted segments and the final output.
pub const OUTPUT_EXTENSION: &str = "mp4";
/// Extension of generated thumbnails.
pub const THUMBNAIL_EXTENSION: &str = "jpg";

/// Lifecycle of one upload folder. Ordering follows the pipeline, so a
/// later stage always compares greater than an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStage {
    Uploaded,
    Split,
    AllConverted,
    Concatenated,
    ThumbnailGenerated,
    Delivered,
}

/// Segment-count marker contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentManifest {
    /// File stem of the original upload
    pub stem: String,
    /// Extension of the original upload and its raw segments
    pub source_ext: String,
    /// Number of segments the upload was cut into
    pub segments: usize,
    /// Nominal segment length in seconds
    pub segment_seconds: u32,
}

impl SegmentManifest {
    /// Converted segment names in playback order.
    pub fn converted_names(&self) -> Vec<String> {
        (0..self.segments)
            .map(|i| segment_file_name(&self.stem, i, OUTPUT_EXTENSION))
            .collect()
    }

    pub fn final_name(&self) -> String {
        format!("{}.{}", self.stem, OUTPUT_EXTENSION)
    }

    pub fn thumbnail_name(&self) -> String {
        format!("{}.{}", self.stem, THUMBNAIL_EXTENSION)
    }
}

/// Number of fixed-length segments needed to cover `duration_secs`.
pub fn segment_count(duration_secs: f64, segment_seconds: u32) -> usize {
    if duration_secs <= 0.0 || segment_seconds == 0 {
        return 0;
    }
    (duration_secs / segment_seconds as f64).ceil() as usize
}

/// `<stem>.partNNN.<ext>`
pub fn segment_file_name(stem: &str, index: usize, ext: &str) -> String {
    format!("{}.part{:03}.{}", stem, index, ext)
}

/// Parsed segment file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentName {
    pub stem: String,
    pub index: usize,
    pub ext: String,
}

impl SegmentName {
    pub fn parse(file: &str) -> Option<Self> {
        let (rest, ext) = file.rsplit_once('.')?;
        let (stem, part) = rest.rsplit_once('.')?;
        let digits = part.strip_prefix("part")?;
        if stem.is_empty() || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            stem: stem.to_string(),
            index: digits.parse().ok()?,
            ext: ext.to_lowercase(),
        })
    }

    pub fn file_name(&self) -> String {
        segment_file_name(&self.stem, self.index, &self.ext)
    }

    /// Lease marker guarding this segment: `<stem>.partNNN.time.txt`.
    pub fn lease_marker(&self) -> String {
        format!("{}.part{:03}.time.txt", self.stem, self.index)
    }

    /// Name of the converted counterpart.
    pub fn converted(&self) -> String {
        segment_file_name(&self.stem, self.index, OUTPUT_EXTENSION)
    }
}

/// Split a file name into stem and lowercased extension.
pub fn split_extension(file: &str) -> Option<(&str, String)> {
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some((stem, ext.to_lowercase()))
}

/// A raw segment claimed for a worker.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentTask {
    pub folder: String,
    pub file: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// A converted segment uploaded by a worker.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedSegment {
    pub folder: String,
    /// Converted file name (`<stem>.partNNN.mp4`)
    pub file: String,
    /// Raw segment this output replaces
    pub source_file: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

// Payloads can be large; keep Debug output to the identifying fields.
impl std::fmt::Debug for SegmentTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentTask")
            .field("folder", &self.folder)
            .field("file", &self.file)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl std::fmt::Debug for ConvertedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvertedSegment")
            .field("folder", &self.folder)
            .field("file", &self.file)
            .field("source_file", &self.source_file)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_count() {
        assert_eq!(segment_count(301.0, 150), 3);
        assert_eq!(segment_count(300.0, 150), 2);
        assert_eq!(segment_count(10.0, 150), 1);
        assert_eq!(segment_count(0.0, 150), 0);
        assert_eq!(segment_count(100.0, 0), 0);
    }

    #[test]
    fn test_segment_name_roundtrip() {
        let name = segment_file_name("holiday.trip", 2, "mov");
        assert_eq!(name, "holiday.trip.part002.mov");
        let parsed = SegmentName::parse(&name).unwrap();
        assert_eq!(parsed.stem, "holiday.trip");
        assert_eq!(parsed.index, 2);
        assert_eq!(parsed.lease_marker(), "holiday.trip.part002.time.txt");
        assert_eq!(parsed.converted(), "holiday.trip.part002.mp4");
    }

    #[test]
    fn test_non_segment_names_rejected() {
        assert!(SegmentName::parse("holiday.mov").is_none());
        assert!(SegmentName::parse("holiday.partxx.mov").is_none());
        assert!(SegmentName::parse("segments.json").is_none());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(VideoStage::Uploaded < VideoStage::Split);
        assert!(VideoStage::AllConverted < VideoStage::Concatenated);
        assert!(VideoStage::ThumbnailGenerated < VideoStage::Delivered);
    }

    #[test]
    fn test_manifest_names() {
        let manifest = SegmentManifest {
            stem: "clip".to_string(),
            source_ext: "mov".to_string(),
            segments: 3,
            segment_seconds: 150,
        };
        assert_eq!(
            manifest.converted_names(),
            vec!["clip.part000.mp4", "clip.part001.mp4", "clip.part002.mp4"]
        );
        assert_eq!(manifest.final_name(), "clip.mp4");
        assert_eq!(manifest.thumbnail_name(), "clip.jpg");
    }
}
