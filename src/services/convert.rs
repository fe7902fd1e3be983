// Subtitle conversion to WebVTT
//
// Handles SRT, ASS/SSA, MicroDVD and existing WebVTT input, plus the
// single-byte code pages common in community uploads.

use anyhow::{anyhow, bail, Result};
use encoding_rs::Encoding;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

const DEFAULT_MICRODVD_FPS: f64 = 23.976;

static RE_TIMING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2}:)?(\d{1,2}):(\d{1,2})[,.](\d{1,3})\s*-->\s*(\d{1,2}:)?(\d{1,2}):(\d{1,2})[,.](\d{1,3})")
        .unwrap()
});
static RE_BRACE_TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^{}]*\}").unwrap());
static RE_ASS_SEGMENTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^{}]*\}|[^{]+|\{").unwrap());
static RE_EMPTY_TAG_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<b></b>|<i></i>|<u></u>").unwrap());
static RE_POS_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pos\s*\(\s*([\d.]+)\s*,\s*([\d.]+)\s*\)").unwrap());
static RE_MICRODVD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{(\d+)\}\{(\d*)\}(.*)$").unwrap());

/// Body served in place of a subtitle when there is nothing to show
pub fn placeholder_vtt(message: &str) -> String {
    format!("WEBVTT\n\n00:00:00.000 --> 00:00:08.000\n{}\n", message)
}

#[derive(Debug, Clone, PartialEq)]
struct Cue {
    start_ms: u64,
    end_ms: u64,
    settings: String,
    text: String,
}

// ============================================================================
// Text decoding
// ============================================================================

/// Decode raw subtitle bytes. An explicit encoding label wins; otherwise BOMs
/// are honoured, valid UTF-8 is taken as-is and anything else is read as a
/// Windows code page.
pub fn decode_text(data: &[u8], encoding: Option<&str>) -> Result<String> {
    if let Some(label) = encoding.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty()) {
        return decode_with_label(data, &label);
    }

    if let Some((from_bom, bom_len)) = Encoding::for_bom(data) {
        let (text, _) = from_bom.decode_without_bom_handling(&data[bom_len..]);
        return Ok(text.into_owned());
    }

    match std::str::from_utf8(data) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => {
            let code_page = guess_code_page(data);
            tracing::debug!("Subtitle is not UTF-8, decoding as {}", code_page);
            decode_with_label(data, code_page)
        }
    }
}

fn decode_with_label(data: &[u8], label: &str) -> Result<String> {
    let label = if label == "utf-8-sig" { "utf-8" } else { label };
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| anyhow!("Unsupported encoding: {}", label))?;
    let (text, actual, had_errors) = encoding.decode(data);
    if had_errors {
        tracing::debug!("Replaced undecodable bytes while reading {} text", actual.name());
    }
    Ok(text.into_owned())
}

/// Central European text uses bytes that are control-like or rare in cp1252
fn guess_code_page(data: &[u8]) -> &'static str {
    const CP1250_MARKERS: &[u8] = &[0xB9, 0xB3, 0x9C, 0x9F, 0x8C, 0x8F, 0xA5];
    if data.iter().any(|b| CP1250_MARKERS.contains(b)) {
        "cp1250"
    } else {
        "cp1252"
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Convert a subtitle file to WebVTT text
pub fn convert_to_vtt(
    data: &[u8],
    extension: &str,
    encoding: Option<&str>,
    fps: Option<f64>,
) -> Result<String> {
    let text = decode_text(data, encoding)?;
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let extension = extension.trim_start_matches('.').to_lowercase();

    if is_vtt(&text) {
        return Ok(ensure_trailing_newline(text.trim_start_matches('\u{feff}')));
    }

    let cues = match extension.as_str() {
        "vtt" => bail!("File does not start with a WEBVTT header"),
        "srt" | "txt" => parse_srt(&text),
        "ass" | "ssa" => return convert_ass(&text),
        "sub" => {
            let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
            if RE_MICRODVD_LINE.is_match(first_line.trim()) {
                parse_microdvd(&text, fps)
            } else {
                parse_srt(&text)
            }
        }
        other => bail!("Unsupported subtitle format: {}", other),
    };

    if cues.is_empty() {
        bail!("No subtitle cues found in {} file", extension);
    }

    Ok(render_vtt(&cues))
}

pub fn is_vtt(text: &str) -> bool {
    text.trim_start_matches('\u{feff}').trim_start().starts_with("WEBVTT")
}

fn ensure_trailing_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

fn render_vtt(cues: &[Cue]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for cue in cues {
        out.push_str(&format_timestamp(cue.start_ms));
        out.push_str(" --> ");
        out.push_str(&format_timestamp(cue.end_ms));
        if !cue.settings.is_empty() {
            out.push(' ');
            out.push_str(&cue.settings);
        }
        out.push('\n');
        out.push_str(&cue.text);
        out.push_str("\n\n");
    }
    out
}

fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, ms % 1000)
}

// ============================================================================
// SRT
// ============================================================================

fn parse_srt(text: &str) -> Vec<Cue> {
    let mut cues = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(caps) = RE_TIMING_LINE.captures(line) else {
            continue;
        };
        let (Some(start_ms), Some(end_ms)) = (
            srt_time_to_ms(caps.get(1), &caps[2], &caps[3], &caps[4]),
            srt_time_to_ms(caps.get(5), &caps[6], &caps[7], &caps[8]),
        ) else {
            continue;
        };

        let mut text_lines = Vec::new();
        while let Some(next) = lines.peek() {
            if next.trim().is_empty() || RE_TIMING_LINE.is_match(next) {
                break;
            }
            text_lines.push(RE_BRACE_TAGS.replace_all(next, "").trim_end().to_string());
            lines.next();
        }

        // A bare index line directly before the next timing line belongs to the next cue
        if matches!(text_lines.last(), Some(last) if last.trim().parse::<u32>().is_ok())
            && lines.peek().is_some_and(|l| RE_TIMING_LINE.is_match(l))
        {
            text_lines.pop();
        }

        let body = text_lines.join("\n");
        if body.trim().is_empty() || end_ms <= start_ms {
            continue;
        }
        cues.push(Cue {
            start_ms,
            end_ms,
            settings: String::new(),
            text: body,
        });
    }

    cues
}

fn srt_time_to_ms(hours: Option<regex::Match>, minutes: &str, seconds: &str, fraction: &str) -> Option<u64> {
    let hours: u64 = match hours {
        Some(h) => h.as_str().trim_end_matches(':').parse().ok()?,
        None => 0,
    };
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    // "5" is 500ms, "05" is 50ms
    let millis: u64 = format!("{:0<3}", fraction).parse().ok()?;
    Some(hours * 3_600_000 + minutes * 60_000 + seconds * 1000 + millis)
}

// ============================================================================
// MicroDVD
// ============================================================================

fn parse_microdvd(text: &str, fps: Option<f64>) -> Vec<Cue> {
    let mut fps = fps.filter(|f| *f > 0.0).unwrap_or(DEFAULT_MICRODVD_FPS);
    let mut cues = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let Some(caps) = RE_MICRODVD_LINE.captures(line.trim()) else {
            continue;
        };
        let start_frame: u64 = caps[1].parse().unwrap_or(0);
        let end_frame: u64 = caps[2].parse().unwrap_or(start_frame);
        let body = &caps[3];

        // `{1}{1}23.976` declares the frame rate
        if index == 0 && start_frame <= 1 && end_frame <= 1 {
            if let Ok(declared) = body.trim().parse::<f64>() {
                if declared > 0.0 {
                    fps = declared;
                }
                continue;
            }
        }

        let body = RE_BRACE_TAGS.replace_all(body, "").replace('|', "\n");
        if body.trim().is_empty() || end_frame <= start_frame {
            continue;
        }

        cues.push(Cue {
            start_ms: (start_frame as f64 / fps * 1000.0).round() as u64,
            end_ms: (end_frame as f64 / fps * 1000.0).round() as u64,
            settings: String::new(),
            text: body.trim().to_string(),
        });
    }

    cues
}

// ============================================================================
// ASS/SSA
// ============================================================================

#[derive(Debug, Clone, Default)]
struct AssStyle {
    bold: bool,
    italic: bool,
    underline: bool,
    alignment: u8,
    margin_v: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Other,
    ScriptInfo,
    Styles { legacy: bool },
    Events,
}

#[derive(Debug)]
struct AssEvent {
    layer: i64,
    start_ms: u64,
    end_ms: u64,
    style: String,
    margin_v: f64,
    text: String,
}

fn convert_ass(text: &str) -> Result<String> {
    let mut section = Section::Other;
    let mut play_res_y = 0.0f64;
    let mut style_format: Vec<String> = Vec::new();
    let mut event_format: Vec<String> = Vec::new();
    let mut styles: HashMap<String, AssStyle> = HashMap::new();
    let mut events: Vec<AssEvent> = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            section = match line.to_lowercase().as_str() {
                "[script info]" => Section::ScriptInfo,
                "[v4+ styles]" => Section::Styles { legacy: false },
                "[v4 styles]" => Section::Styles { legacy: true },
                "[events]" => Section::Events,
                _ => Section::Other,
            };
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim_start();

        match section {
            Section::ScriptInfo => {
                if key.eq_ignore_ascii_case("playresy") {
                    play_res_y = value.trim().parse().unwrap_or(0.0);
                }
            }
            Section::Styles { legacy } => {
                if key.eq_ignore_ascii_case("format") {
                    style_format = split_format(value);
                } else if key.eq_ignore_ascii_case("style") {
                    if let Some((name, style)) = parse_style(value, &style_format, legacy) {
                        styles.insert(name, style);
                    }
                }
            }
            Section::Events => {
                if key.eq_ignore_ascii_case("format") {
                    event_format = split_format(value);
                } else if key.eq_ignore_ascii_case("dialogue") {
                    match parse_dialogue(value, &event_format) {
                        Some(event) => events.push(event),
                        None => tracing::debug!("Ignoring malformed Dialogue line: {}", line),
                    }
                }
            }
            Section::Other => {}
        }
    }

    if events.is_empty() {
        bail!("No dialogue events found in ASS/SSA file");
    }

    events.sort_by_key(|e| e.start_ms);

    let mut cues = Vec::new();
    for event in &events {
        if event.layer != 0 || event.start_ms >= event.end_ms {
            continue;
        }

        let style = styles
            .get(&event.style)
            .or_else(|| styles.get("Default"))
            .cloned()
            .unwrap_or_else(|| AssStyle {
                alignment: 2,
                ..Default::default()
            });

        let (body, override_alignment) = render_ass_text(&event.text, &style);
        if body.trim().is_empty() {
            continue;
        }

        let margin_v = if event.margin_v > 0.0 { event.margin_v } else { style.margin_v };
        let settings = cue_settings(override_alignment.unwrap_or(style.alignment), margin_v, play_res_y);

        cues.push(Cue {
            start_ms: event.start_ms,
            end_ms: event.end_ms,
            settings,
            text: body,
        });
    }

    if cues.is_empty() {
        bail!("ASS/SSA file contained no displayable dialogue");
    }

    Ok(render_vtt(&cues))
}

fn split_format(value: &str) -> Vec<String> {
    value.split(',').map(|f| f.trim().to_lowercase()).collect()
}

fn parse_style(value: &str, format: &[String], legacy: bool) -> Option<(String, AssStyle)> {
    let fields: Vec<&str> = value.split(',').map(str::trim).collect();
    let get = |name: &str| {
        format
            .iter()
            .position(|f| f == name)
            .and_then(|i| fields.get(i).copied())
    };
    let flag = |name: &str| matches!(get(name), Some("-1") | Some("1"));

    let name = get("name").unwrap_or_else(|| fields.first().copied().unwrap_or("Default"));
    let mut alignment: u8 = get("alignment").and_then(|a| a.parse().ok()).unwrap_or(2);
    if legacy {
        alignment = legacy_alignment(alignment);
    }

    Some((
        name.to_string(),
        AssStyle {
            bold: flag("bold"),
            italic: flag("italic"),
            underline: flag("underline"),
            alignment,
            margin_v: get("marginv").and_then(|m| m.parse().ok()).unwrap_or(0.0),
        },
    ))
}

/// SSA v4 alignment: 1-3 bottom, +4 top, +8 middle
fn legacy_alignment(value: u8) -> u8 {
    match value {
        1..=3 => value,
        5..=7 => value + 2,
        9..=11 => value - 5,
        _ => 2,
    }
}

fn parse_dialogue(value: &str, format: &[String]) -> Option<AssEvent> {
    let default_format;
    let format = if format.is_empty() {
        default_format = split_format("Layer,Start,End,Style,Name,MarginL,MarginR,MarginV,Effect,Text");
        &default_format
    } else {
        format
    };

    // Text is always last and may itself contain commas
    let fields: Vec<&str> = value.splitn(format.len(), ',').collect();
    if fields.len() < format.len() {
        return None;
    }
    let get = |name: &str| format.iter().position(|f| f == name).map(|i| fields[i].trim());

    Some(AssEvent {
        // SSA v4 uses "Marked" in place of Layer
        layer: get("layer").and_then(|l| l.parse().ok()).unwrap_or(0),
        start_ms: ass_time_to_ms(get("start")?)?,
        end_ms: ass_time_to_ms(get("end")?)?,
        style: get("style").unwrap_or("Default").trim_start_matches('*').to_string(),
        margin_v: get("marginv").and_then(|m| m.parse().ok()).unwrap_or(0.0),
        text: format
            .iter()
            .position(|f| f == "text")
            .map(|i| fields[i].to_string())
            .unwrap_or_default(),
    })
}

/// `h:mm:ss.cc`
fn ass_time_to_ms(value: &str) -> Option<u64> {
    let (hms, centis) = value.split_once('.').unwrap_or((value, "0"));
    let mut parts = hms.split(':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next()?.trim().parse().ok()?;
    let seconds: u64 = parts.next()?.trim().parse().ok()?;
    let centis: u64 = centis.trim().get(..2.min(centis.trim().len()))?.parse().ok()?;
    Some(hours * 3_600_000 + minutes * 60_000 + seconds * 1000 + centis * 10)
}

/// Apply inline override tags. Returns the cue text and an `\an` override.
fn render_ass_text(text: &str, style: &AssStyle) -> (String, Option<u8>) {
    let mut bold = style.bold;
    let mut italic = style.italic;
    let mut underline = style.underline;
    let mut alignment = None;
    let mut out = String::new();

    for segment in RE_ASS_SEGMENTS.find_iter(text).map(|m| m.as_str()) {
        if segment.starts_with('{') && segment.ends_with('}') && segment.len() >= 2 {
            for tag in segment[1..segment.len() - 1].split('\\').filter(|t| !t.is_empty()) {
                let tag = tag.trim();
                if let Some(value) = tag.strip_prefix("an") {
                    match value.parse::<u8>() {
                        Ok(a @ 1..=9) => alignment = Some(a),
                        _ => tracing::debug!("Ignoring invalid alignment tag \\{}", tag),
                    }
                } else if tag == "r" {
                    bold = style.bold;
                    italic = style.italic;
                    underline = style.underline;
                    alignment = None;
                } else if RE_POS_TAG.is_match(tag) {
                    // Absolute positioning has no reliable VTT equivalent; keep the style alignment
                } else if let Some(on) = toggle_value(tag, 'b') {
                    bold = on;
                } else if let Some(on) = toggle_value(tag, 'i') {
                    italic = on;
                } else if let Some(on) = toggle_value(tag, 'u') {
                    underline = on;
                }
            }
        } else {
            let plain = segment
                .replace("\\N", "\n")
                .replace("\\n", "\n")
                .replace("\\h", " ");
            out.push_str(&wrap_tags(&plain, bold, italic, underline));
        }
    }

    let out = RE_EMPTY_TAG_PAIR.replace_all(&out, "");
    (out.trim().to_string(), alignment)
}

/// `\b1`, `\b0`, bare `\b`; weights like `\b700` count as bold
fn toggle_value(tag: &str, key: char) -> Option<bool> {
    let rest = tag.strip_prefix(key)?;
    if rest.is_empty() {
        return Some(true);
    }
    rest.parse::<u32>().ok().map(|v| v > 0)
}

fn wrap_tags(text: &str, bold: bool, italic: bool, underline: bool) -> String {
    let mut prefix = String::new();
    let mut suffix = String::new();
    if underline {
        prefix.push_str("<u>");
        suffix.insert_str(0, "</u>");
    }
    if italic {
        prefix.push_str("<i>");
        suffix.insert_str(0, "</i>");
    }
    if bold {
        prefix.push_str("<b>");
        suffix.insert_str(0, "</b>");
    }
    format!("{}{}{}", prefix, text, suffix)
}

/// Numpad alignment to WebVTT cue settings
fn cue_settings(alignment: u8, margin_v: f64, play_res_y: f64) -> String {
    let (vertical, horizontal) = match alignment {
        1 => ("end", "start"),
        3 => ("end", "end"),
        4 => ("middle", "start"),
        5 => ("middle", "center"),
        6 => ("middle", "end"),
        7 => ("start", "start"),
        8 => ("start", "center"),
        9 => ("start", "end"),
        _ => ("end", "center"),
    };

    let margin_pct = if margin_v > 0.0 && play_res_y > 0.0 {
        margin_v / play_res_y * 100.0
    } else {
        0.0
    };

    let mut parts = Vec::new();
    if horizontal != "center" {
        parts.push(format!("align:{}", horizontal));
    }
    match vertical {
        "start" => {
            let line = if margin_pct > 0.0 { margin_pct.max(2.0) } else { 2.0 };
            parts.push(format!("line:{}%", format_percent(line)));
        }
        "middle" => {
            parts.push("line:50%".to_string());
            parts.push("line-align:center".to_string());
        }
        _ => {
            // Bottom is the WebVTT default unless a margin pushes it up
            if margin_pct > 10.0 {
                parts.push(format!("line:{}%", format_percent(100.0 - margin_pct)));
                parts.push("line-align:end".to_string());
            }
        }
    }
    parts.join(" ")
}

fn format_percent(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{:.2}", rounded)
    }
}

/// Extension of a file name without the dot, lowercased
pub fn extension_of(filename: &str) -> Result<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| anyhow!("File '{}' has no extension", filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRT: &str = "1\r\n00:00:01,000 --> 00:00:02,500\r\nHello <i>there</i>\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,000\r\n{\\an8}Second\r\nline\r\n";

    #[test]
    fn test_placeholder() {
        assert_eq!(
            placeholder_vtt("Nothing here"),
            "WEBVTT\n\n00:00:00.000 --> 00:00:08.000\nNothing here\n"
        );
    }

    #[test]
    fn test_srt_to_vtt() {
        let vtt = convert_to_vtt(SRT.as_bytes(), "srt", None, None).unwrap();
        assert_eq!(
            vtt,
            "WEBVTT\n\n00:00:01.000 --> 00:00:02.500\nHello <i>there</i>\n\n00:00:03.000 --> 00:00:04.000\nSecond\nline\n\n"
        );
    }

    #[test]
    fn test_srt_short_fraction() {
        let srt = "1\n0:01:02,5 --> 0:01:03,25\nshort\n";
        let vtt = convert_to_vtt(srt.as_bytes(), ".SRT", None, None).unwrap();
        assert!(vtt.contains("00:01:02.500 --> 00:01:03.250"));
    }

    #[test]
    fn test_vtt_passthrough() {
        let input = "\u{feff}WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nhi";
        let vtt = convert_to_vtt(input.as_bytes(), "srt", None, None).unwrap();
        assert_eq!(vtt, "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nhi\n");
    }

    #[test]
    fn test_empty_srt_is_error() {
        assert!(convert_to_vtt(b"not a subtitle", "srt", None, None).is_err());
        assert!(convert_to_vtt(b"whatever", "docx", None, None).is_err());
    }

    #[test]
    fn test_microdvd_with_declared_fps() {
        let sub = "{1}{1}25\n{25}{50}First|line\n{75}{100}{y:i}Second\n";
        let vtt = convert_to_vtt(sub.as_bytes(), "sub", None, None).unwrap();
        assert!(vtt.contains("00:00:01.000 --> 00:00:02.000\nFirst\nline"));
        assert!(vtt.contains("00:00:03.000 --> 00:00:04.000\nSecond"));
    }

    #[test]
    fn test_microdvd_explicit_fps() {
        let sub = "{48}{96}Hello\n";
        let vtt = convert_to_vtt(sub.as_bytes(), "sub", None, Some(24.0)).unwrap();
        assert!(vtt.contains("00:00:02.000 --> 00:00:04.000\nHello"));
    }

    const ASS: &str = "[Script Info]
PlayResX: 1920
PlayResY: 1080

[V4+ Styles]
Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding
Style: Default,Arial,48,&H00FFFFFF,&H000000FF,&H00000000,&H00000000,0,0,0,0,100,100,0,0,1,2,0,2,10,10,10,1
Style: Sign,Arial,48,&H00FFFFFF,&H000000FF,&H00000000,&H00000000,-1,0,0,0,100,100,0,0,1,2,0,8,10,10,10,1

[Events]
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
Dialogue: 0,0:00:05.00,0:00:06.50,Default,,0,0,0,,Later line, with comma
Dialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,{\\i1}Hello{\\i0} world\\Nnext
Dialogue: 1,0:00:01.00,0:00:02.00,Default,,0,0,0,,background layer
Dialogue: 0,0:00:03.00,0:00:03.00,Default,,0,0,0,,zero length
Dialogue: 0,0:00:03.00,0:00:04.00,Sign,,0,0,0,,TOP
Dialogue: 0,0:00:04.00,0:00:05.00,Default,,0,0,0,,{\\an7\\fs20}corner
Dialogue: 0,0:00:04.00,0:00:05.00,Default,,0,0,0,,{\\pos(10,10)}
";

    #[test]
    fn test_ass_to_vtt() {
        let vtt = convert_to_vtt(ASS.as_bytes(), "ass", None, None).unwrap();
        let expected = "WEBVTT\n\n\
00:00:01.000 --> 00:00:02.000\n<i>Hello</i> world\nnext\n\n\
00:00:03.000 --> 00:00:04.000 line:2%\n<b>TOP</b>\n\n\
00:00:04.000 --> 00:00:05.000 align:start line:2%\ncorner\n\n\
00:00:05.000 --> 00:00:06.500\nLater line, with comma\n\n";
        assert_eq!(vtt, expected);
    }

    #[test]
    fn test_ass_without_events_fails() {
        let err = convert_to_vtt(b"[Script Info]\nTitle: x\n", "ssa", None, None).unwrap_err();
        assert!(err.to_string().contains("No dialogue"));
    }

    #[test]
    fn test_decode_cp1250_and_bom() {
        // "Zażółć" in cp1250
        let bytes = [0x5A, 0x61, 0xBF, 0xF3, 0xB3, 0xE6];
        assert_eq!(decode_text(&bytes, None).unwrap(), "Zażółć");
        assert_eq!(decode_text(&bytes, Some("cp1250")).unwrap(), "Zażółć");

        // "café" in cp1252
        assert_eq!(decode_text(&[0x63, 0x61, 0x66, 0xE9], None).unwrap(), "café");

        let utf16 = [0xFF, 0xFE, b'h', 0, b'i', 0];
        assert_eq!(decode_text(&utf16, None).unwrap(), "hi");
        assert_eq!(decode_text(&[0xEF, 0xBB, 0xBF, b'o', b'k'], None).unwrap(), "ok");
        assert!(decode_text(b"x", Some("ebcdic")).is_err());
    }

    #[test]
    fn test_decode_explicit_labels() {
        // "Привет" in cp1251
        let cyrillic = [0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];
        assert_eq!(decode_text(&cyrillic, Some("Windows-1251")).unwrap(), "Привет");
        assert_eq!(decode_text(&[0, b'o', 0, b'k'], Some("utf-16be")).unwrap(), "ok");
        assert_eq!(decode_text(&[0xEF, 0xBB, 0xBF, b'o', b'k'], Some("utf-8-sig")).unwrap(), "ok");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("Movie.EN.SRT").unwrap(), "srt");
        assert!(extension_of("noext").is_err());
    }
}
