//! Caption file parsing (WebVTT, SRT, YouTube srv1 XML).
//!
//! Pure parsers that turn fetched caption payloads into time-coded segments.
//! All tolerate the sloppy output real caption pipelines produce: cue
//! identifiers, styling tags, HTML entities, and missing durations.

use super::TranscriptSegment;
use crate::error::{PensumError, Result};
use regex::Regex;

/// Caption payload formats the extractor can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionFormat {
    Vtt,
    Srt,
    /// YouTube timed-text XML (`<text start dur>` elements).
    Srv1,
}

impl std::str::FromStr for CaptionFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vtt" | "webvtt" => Ok(CaptionFormat::Vtt),
            "srt" => Ok(CaptionFormat::Srt),
            "srv1" | "xml" => Ok(CaptionFormat::Srv1),
            _ => Err(format!("Unknown caption format: {}", s)),
        }
    }
}

/// Guess the format from the payload itself.
///
/// Used when a track URL carries no usable extension.
pub fn sniff_format(content: &str) -> CaptionFormat {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("WEBVTT") {
        CaptionFormat::Vtt
    } else if trimmed.starts_with("<?xml") || trimmed.contains("<transcript") {
        CaptionFormat::Srv1
    } else {
        CaptionFormat::Srt
    }
}

/// Parse a caption payload into ordered segments.
pub fn parse_captions(content: &str, format: CaptionFormat) -> Result<Vec<TranscriptSegment>> {
    let segments = match format {
        CaptionFormat::Vtt => parse_vtt(content),
        CaptionFormat::Srt => parse_srt(content),
        CaptionFormat::Srv1 => parse_srv1(content),
    };

    let segments = fill_missing_durations(segments);
    if segments.is_empty() {
        return Err(PensumError::NoTranscriptAvailable(
            "caption track contained no usable cues".to_string(),
        ));
    }
    Ok(segments)
}

/// Parse WebVTT content.
///
/// Skips the header, NOTE/STYLE blocks, and cue identifiers; strips cue
/// settings after the timing line and inline styling/karaoke tags.
fn parse_vtt(content: &str) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();
    let mut lines = content.lines().peekable();

    while let Some(line) = lines.next() {
        let line = line.trim_start_matches('\u{feff}');
        if !line.contains("-->") {
            continue;
        }

        let Some((start, duration)) = parse_timing_line(line, '.') else {
            continue;
        };

        let mut text_lines = Vec::new();
        while let Some(next) = lines.peek() {
            if next.trim().is_empty() {
                break;
            }
            text_lines.push(strip_inline_tags(lines.next().unwrap_or_default()));
        }

        let text = normalize_cue_text(&text_lines.join(" "));
        if text.is_empty() {
            continue;
        }

        // Rolling auto-captions repeat the previous line; keep one copy.
        if segments
            .last()
            .is_some_and(|prev: &TranscriptSegment| prev.text == text)
        {
            continue;
        }

        segments.push(TranscriptSegment::new(start, duration, text));
    }

    segments
}

/// Parse SRT content (numbered blocks with comma-millisecond timing).
fn parse_srt(content: &str) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();

    for block in content.replace("\r\n", "\n").split("\n\n") {
        let mut lines = block.lines().filter(|l| !l.trim().is_empty());

        let Some(first) = lines.next() else { continue };
        // The index line is optional in the wild; the timing line is not.
        let timing = if first.contains("-->") {
            first
        } else {
            match lines.next() {
                Some(l) if l.contains("-->") => l,
                _ => continue,
            }
        };

        let Some((start, duration)) = parse_timing_line(timing, ',') else {
            continue;
        };

        let text = normalize_cue_text(
            &lines
                .map(strip_inline_tags)
                .collect::<Vec<_>>()
                .join(" "),
        );
        if !text.is_empty() {
            segments.push(TranscriptSegment::new(start, duration, text));
        }
    }

    segments
}

/// Parse YouTube srv1 timed-text XML.
fn parse_srv1(content: &str) -> Vec<TranscriptSegment> {
    // <text start="12.3" dur="4.5">body</text>; dur is sometimes absent.
    let cue_re = Regex::new(r#"<text\s+([^>]*)>(.*?)</text>"#)
        .expect("valid srv1 cue regex");
    let start_re = Regex::new(r#"start="([0-9.]+)""#).expect("valid start regex");
    let dur_re = Regex::new(r#"dur="([0-9.]+)""#).expect("valid dur regex");

    let flat = content.replace('\n', " ");
    let mut segments = Vec::new();

    for caps in cue_re.captures_iter(&flat) {
        let attrs = &caps[1];
        let Some(start) = start_re
            .captures(attrs)
            .and_then(|c| c[1].parse::<f64>().ok())
        else {
            continue;
        };
        let duration = dur_re
            .captures(attrs)
            .and_then(|c| c[1].parse::<f64>().ok())
            .unwrap_or(0.0);

        let text = normalize_cue_text(&strip_inline_tags(&caps[2]));
        if !text.is_empty() {
            segments.push(TranscriptSegment::new(start, duration, text));
        }
    }

    segments
}

/// Parse `HH:MM:SS.mmm --> HH:MM:SS.mmm` (hours optional, `sep` is the
/// millisecond separator). Returns (start, duration).
fn parse_timing_line(line: &str, sep: char) -> Option<(f64, f64)> {
    let mut parts = line.split("-->");
    let start = parse_timestamp(parts.next()?.trim(), sep)?;
    // Cue settings may trail the end timestamp (e.g. "align:start").
    let end_part = parts.next()?.trim();
    let end_token = end_part.split_whitespace().next()?;
    let end = parse_timestamp(end_token, sep)?;
    Some((start, (end - start).max(0.0)))
}

/// Parse a single `HH:MM:SS.mmm` / `MM:SS.mmm` timestamp.
fn parse_timestamp(token: &str, sep: char) -> Option<f64> {
    let (clock, millis) = match token.rsplit_once(sep) {
        Some((c, m)) => (c, m.parse::<f64>().ok()? / 1000.0),
        None => (token, 0.0),
    };

    let fields: Vec<&str> = clock.split(':').collect();
    let (hours, minutes, seconds) = match fields.as_slice() {
        [h, m, s] => (h.parse::<f64>().ok()?, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        [m, s] => (0.0, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        _ => return None,
    };

    Some(hours * 3600.0 + minutes * 60.0 + seconds + millis)
}

/// Strip `<c>`, `<i>`, karaoke `<00:00:01.000>` and similar inline tags.
fn strip_inline_tags(line: &str) -> String {
    let tag_re = Regex::new(r"<[^>]*>").expect("valid tag regex");
    tag_re.replace_all(line, "").to_string()
}

/// Collapse whitespace and decode HTML entities.
fn normalize_cue_text(text: &str) -> String {
    let decoded = unescape_entities(text);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the entities caption sources actually emit.
fn unescape_entities(text: &str) -> String {
    let mut out = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    // Numeric entities (&#8217; and friends) show up in auto-captions.
    let num_re = Regex::new(r"&#(\d+);").expect("valid entity regex");
    if num_re.is_match(&out) {
        out = num_re
            .replace_all(&out, |caps: &regex::Captures| {
                caps[1]
                    .parse::<u32>()
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default()
            })
            .to_string();
    }
    out
}

/// Extend zero-duration cues to the next cue's start so chunk end times stay
/// meaningful. The final cue keeps its declared duration.
fn fill_missing_durations(mut segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    for i in 0..segments.len() {
        if segments[i].duration_seconds <= 0.0 {
            let next_start = segments.get(i + 1).map(|s| s.start_seconds);
            if let Some(next_start) = next_start {
                segments[i].duration_seconds = (next_start - segments[i].start_seconds).max(0.0);
            }
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_VTT: &str = "WEBVTT\n\nNOTE generated\n\n1\n00:00:00.000 --> 00:00:02.500 align:start position:0%\nHello <c.colorCCCCCC>world</c>\n\n2\n00:00:02.500 --> 00:00:05.000\nThis is a test\nacross two lines\n";

    const SAMPLE_SRT: &str = "1\r\n00:00:00,000 --> 00:00:02,500\r\nHello world\r\n\r\n2\r\n00:00:02,500 --> 00:00:05,000\r\nThis is a test\r\n";

    const SAMPLE_SRV1: &str = r#"<?xml version="1.0" encoding="utf-8"?><transcript><text start="0" dur="2.5">Hello world</text><text start="2.5" dur="2.5">It&amp;#39;s a test &amp; more</text></transcript>"#;

    #[test]
    fn test_parse_vtt_basic() {
        let segments = parse_captions(SAMPLE_VTT, CaptionFormat::Vtt).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello world");
        assert_eq!(segments[0].start_seconds, 0.0);
        assert_eq!(segments[0].duration_seconds, 2.5);
        assert_eq!(segments[1].text, "This is a test across two lines");
    }

    #[test]
    fn test_parse_vtt_deduplicates_rolling_lines() {
        let vtt = "WEBVTT\n\n00:00:00.000 --> 00:00:01.000\nsame line\n\n00:00:01.000 --> 00:00:02.000\nsame line\n\n00:00:02.000 --> 00:00:03.000\nnew line\n";
        let segments = parse_captions(vtt, CaptionFormat::Vtt).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "same line");
        assert_eq!(segments[1].text, "new line");
    }

    #[test]
    fn test_parse_srt_basic() {
        let segments = parse_captions(SAMPLE_SRT, CaptionFormat::Srt).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello world");
        assert_eq!(segments[1].start_seconds, 2.5);
        assert_eq!(segments[1].duration_seconds, 2.5);
    }

    #[test]
    fn test_parse_srt_without_index_lines() {
        let srt = "00:00:00,000 --> 00:00:01,000\nfirst\n\n00:00:01,000 --> 00:00:02,000\nsecond\n";
        let segments = parse_captions(srt, CaptionFormat::Srt).unwrap();
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_parse_srv1_with_entities() {
        let segments = parse_captions(SAMPLE_SRV1, CaptionFormat::Srv1).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello world");
        assert_eq!(segments[1].text, "It's a test & more");
    }

    #[test]
    fn test_srv1_missing_duration_filled_from_next_start() {
        let xml = r#"<transcript><text start="0">a</text><text start="3.0" dur="1.0">b</text></transcript>"#;
        let segments = parse_captions(xml, CaptionFormat::Srv1).unwrap();
        assert_eq!(segments[0].duration_seconds, 3.0);
    }

    #[test]
    fn test_empty_payload_is_an_error() {
        assert!(parse_captions("WEBVTT\n", CaptionFormat::Vtt).is_err());
    }

    #[test]
    fn test_sniff_format() {
        assert_eq!(sniff_format(SAMPLE_VTT), CaptionFormat::Vtt);
        assert_eq!(sniff_format(SAMPLE_SRV1), CaptionFormat::Srv1);
        assert_eq!(sniff_format(SAMPLE_SRT), CaptionFormat::Srt);
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(parse_timestamp("00:00:02.500", '.'), Some(2.5));
        assert_eq!(parse_timestamp("01:05.000", '.'), Some(65.0));
        assert_eq!(parse_timestamp("01:00:00,250", ','), Some(3600.25));
    }
}
