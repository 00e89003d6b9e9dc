//! NZB reading for the `list` command
//!
//! Parsing is delegated to `nzb-rs`; this module flattens the result into
//! what the listing needs and recovers file names from subjects.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;

use crate::error::{NzbError, UlNzbError};

type Result<T> = std::result::Result<T, UlNzbError>;

static QUOTED_NAME: Lazy<Regex> = Lazy::new(|| {
    // Handle both regular quotes and HTML entities (&quot;)
    Regex::new(r#"(?:&quot;|")([^"]+?)(?:&quot;|")"#).expect("static regex")
});

static PART_COUNTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d+)/(\d+)\)\s*$").expect("static regex"));

#[derive(Debug, Clone, Serialize)]
pub struct NzbFileSummary {
    pub name: String,
    pub poster: String,
    pub subject: String,
    pub groups: Vec<String>,
    pub segments: usize,
    /// Segments announced by the subject's `(i/n)` counter, when present
    pub expected_segments: Option<u32>,
    pub bytes: u64,
}

impl NzbFileSummary {
    pub fn is_complete(&self) -> bool {
        self.expected_segments
            .map_or(true, |expected| expected as usize == self.segments)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NzbListing {
    pub name: Option<String>,
    pub files: Vec<NzbFileSummary>,
}

impl NzbListing {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(NzbError::NotFound(path.to_path_buf()).into());
        }
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|file| file.bytes).sum()
    }

    pub fn total_segments(&self) -> usize {
        self.files.iter().map(|file| file.segments).sum()
    }
}

impl FromStr for NzbListing {
    type Err = UlNzbError;

    fn from_str(s: &str) -> Result<Self> {
        let inner = nzb_rs::Nzb::parse(s)
            .map_err(|e| NzbError::ParseError(format!("Failed to parse NZB: {}", e)))?;

        let files = inner
            .files
            .iter()
            .map(|file| NzbFileSummary {
                name: filename_from_subject(&file.subject)
                    .unwrap_or_else(|| file.subject.clone()),
                poster: file.poster.clone(),
                subject: file.subject.clone(),
                groups: file.groups.clone(),
                segments: file.segments.len(),
                expected_segments: segment_total_from_subject(&file.subject),
                bytes: file.segments.iter().map(|s| s.size as u64).sum(),
            })
            .collect();

        Ok(Self {
            name: meta_name(s),
            files,
        })
    }
}

/// Extract the file name from a subject like `dir [1/9] - "file.ext" yEnc (1/5)`
pub fn filename_from_subject(subject: &str) -> Option<String> {
    QUOTED_NAME
        .captures(subject)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn segment_total_from_subject(subject: &str) -> Option<u32> {
    PART_COUNTER
        .captures(subject)
        .and_then(|caps| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// `<meta type="name">`, which nzb-rs does not expose
fn meta_name(xml: &str) -> Option<String> {
    static META_NAME: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"<meta\s+type="name"\s*>([^<]*)</meta>"#).expect("static regex"));
    META_NAME
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            quick_xml::escape::unescape(m.as_str())
                .map_or_else(|_| m.as_str().to_string(), |name| name.into_owned())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nzb PUBLIC "-//newzBin//DTD NZB 1.1//EN" "http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd">
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
  <head>
    <meta type="name">fish &amp; chips</meta>
  </head>
  <file poster="me@example.org" date="1700000000" subject="set [1/1] - &quot;a.bin&quot; yEnc (1/3)">
    <groups>
      <group>alt.binaries.test</group>
    </groups>
    <segments>
      <segment bytes="128" number="1">one@example.org</segment>
      <segment bytes="44" number="3">three@example.org</segment>
    </segments>
  </file>
</nzb>
"#;

    #[test]
    fn test_listing() {
        let listing: NzbListing = SAMPLE.parse().unwrap();
        assert_eq!(listing.name.as_deref(), Some("fish & chips"));
        assert_eq!(listing.files.len(), 1);

        let file = &listing.files[0];
        assert_eq!(file.name, "a.bin");
        assert_eq!(file.segments, 2);
        assert_eq!(file.expected_segments, Some(3));
        assert!(!file.is_complete());
        assert_eq!(listing.total_size(), 172);
        assert_eq!(listing.total_segments(), 2);
    }

    #[test]
    fn test_filename_from_subject() {
        assert_eq!(
            filename_from_subject("[NEW] \"movie.mkv\" yEnc (1/10)").as_deref(),
            Some("movie.mkv")
        );
        assert_eq!(filename_from_subject("no quotes here"), None);
    }

    #[test]
    fn test_missing_file() {
        let result = NzbListing::from_file("/nonexistent/file.nzb");
        assert!(matches!(result, Err(UlNzbError::Nzb(NzbError::NotFound(_)))));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let result: Result<NzbListing> = "not xml".parse();
        assert!(matches!(result, Err(UlNzbError::Nzb(NzbError::ParseError(_)))));
    }
}
