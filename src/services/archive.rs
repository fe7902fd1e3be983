// ZIP handling for provider downloads

use anyhow::{anyhow, bail, Result};
use std::io::{Cursor, Read};

pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "vtt", "ass", "ssa", "sub"];

/// Largest subtitle entry we unpack from a provider archive
pub const MAX_ENTRY_BYTES: u64 = 10 * 1024 * 1024;

pub fn looks_like_zip(data: &[u8]) -> bool {
    data.starts_with(b"PK\x03\x04")
}

pub fn is_subtitle_filename(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SUBTITLE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Pick the subtitle entry from an archive.
///
/// With an episode number the first entry whose name contains `e05`, ` 05 `,
/// `-05-` or `.05.` wins; otherwise the first subtitle entry is returned.
/// Returns the entry name and its bytes. Entries over `limit` bytes are an error.
pub fn extract_subtitle_from_zip(
    data: &[u8],
    episode: Option<u32>,
    limit: u64,
) -> Result<(String, Vec<u8>)> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|_| anyhow!("Invalid ZIP file"))?;

    let candidates: Vec<(usize, String)> = (0..archive.len())
        .filter_map(|i| {
            let entry = archive.by_index(i).ok()?;
            if entry.is_dir() || !is_subtitle_filename(entry.name()) {
                return None;
            }
            Some((i, entry.name().to_string()))
        })
        .collect();

    let (index, name) = episode
        .and_then(|ep| {
            let patterns = [
                format!("e{:02}", ep),
                format!(" {:02} ", ep),
                format!("-{:02}-", ep),
                format!(".{:02}.", ep),
            ];
            candidates
                .iter()
                .find(|(_, name)| {
                    let lower = name.to_lowercase();
                    patterns.iter().any(|p| lower.contains(p.as_str()))
                })
                .cloned()
        })
        .or_else(|| candidates.first().cloned())
        .ok_or_else(|| anyhow!("No subtitle file found in ZIP archive"))?;

    tracing::debug!("Extracting '{}' from ZIP archive", name);

    let mut entry = archive
        .by_index(index)
        .map_err(|e| anyhow!("Failed to open '{}' in ZIP archive: {}", name, e))?;
    if entry.size() > limit {
        bail!("'{}' in ZIP archive is too large ({} bytes)", name, entry.size());
    }

    // The header size is not trusted; stop reading one byte past the limit
    let mut content = Vec::new();
    (&mut entry).take(limit + 1).read_to_end(&mut content)?;
    if content.len() as u64 > limit {
        bail!("'{}' in ZIP archive is too large", name);
    }

    Ok((name, content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_first_subtitle() {
        let zip = build_zip(&[("readme.txt", "hi"), ("Movie.srt", "1"), ("Movie.ass", "2")]);
        assert!(looks_like_zip(&zip));
        let (name, content) = extract_subtitle_from_zip(&zip, None, MAX_ENTRY_BYTES).unwrap();
        assert_eq!(name, "Movie.srt");
        assert_eq!(content, b"1");
    }

    #[test]
    fn test_extract_matching_episode() {
        let zip = build_zip(&[
            ("Show.S01E01.srt", "one"),
            ("Show.S01E02.srt", "two"),
            ("Show - 03 - Title.srt", "three"),
        ]);
        let (name, content) = extract_subtitle_from_zip(&zip, Some(2), MAX_ENTRY_BYTES).unwrap();
        assert_eq!(name, "Show.S01E02.srt");
        assert_eq!(content, b"two");

        let (name, _) = extract_subtitle_from_zip(&zip, Some(3), MAX_ENTRY_BYTES).unwrap();
        assert_eq!(name, "Show - 03 - Title.srt");

        // no match falls back to the first entry
        let (name, _) = extract_subtitle_from_zip(&zip, Some(9), MAX_ENTRY_BYTES).unwrap();
        assert_eq!(name, "Show.S01E01.srt");
    }

    #[test]
    fn test_extract_errors() {
        let err = extract_subtitle_from_zip(b"not a zip", None, MAX_ENTRY_BYTES).unwrap_err();
        assert_eq!(err.to_string(), "Invalid ZIP file");

        let zip = build_zip(&[("notes.nfo", "x")]);
        let err = extract_subtitle_from_zip(&zip, None, MAX_ENTRY_BYTES).unwrap_err();
        assert_eq!(err.to_string(), "No subtitle file found in ZIP archive");
    }

    #[test]
    fn test_oversized_entries_are_rejected() {
        let body = "x".repeat(100);
        let zip = build_zip(&[("Movie.srt", body.as_str())]);
        let err = extract_subtitle_from_zip(&zip, None, 10).unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!(extract_subtitle_from_zip(&zip, None, 100).is_ok());

        // Central directory claims ~4 GiB for a tiny entry
        let mut zip = build_zip(&[("Movie.srt", "1")]);
        let central = zip
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .unwrap();
        zip[central + 24..central + 28].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        let err = extract_subtitle_from_zip(&zip, None, MAX_ENTRY_BYTES).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}
