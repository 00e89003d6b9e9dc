//! Article assembly: headers, yEnc envelope and encoded payload

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};

use super::job::UploadJob;
use crate::config::PostingConfig;
use crate::yenc::{self, LineEnding, LINE_LENGTH};

/// Header values shared by every article of a run
#[derive(Debug, Clone)]
pub struct ArticleTemplate {
    pub from: String,
    /// Comma-joined newsgroups
    pub newsgroups: String,
    pub prefix: String,
    pub poster: Option<String>,
    pub x_no_archive: bool,
    pub line_ending: LineEnding,
    /// Domain for generated Message-IDs, `None` lets the server assign them
    pub message_id_domain: Option<String>,
}

impl ArticleTemplate {
    pub fn from_config(posting: &PostingConfig) -> Self {
        Self {
            from: posting.from.clone(),
            newsgroups: posting.groups.join(","),
            prefix: posting.prefix.clone(),
            poster: Some(posting.poster.trim())
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            x_no_archive: posting.x_no_archive,
            line_ending: posting.line_ending,
            message_id_domain: posting
                .generate_message_id
                .then(|| message_id_domain(&posting.from)),
        }
    }
}

/// A fully built article, immutable once assembled
#[derive(Debug, Clone)]
pub struct Article {
    headers: Vec<(&'static str, String)>,
    body: Bytes,
    message_id: Option<String>,
}

impl Article {
    /// Encode one raw chunk and wrap it in headers and the yEnc envelope
    pub fn build(template: &ArticleTemplate, job: &UploadJob, index: u32, raw: &[u8]) -> Self {
        let chunk_crc = yenc::crc32(raw);
        let ending = template.line_ending;

        let mut body = Vec::with_capacity(raw.len() + raw.len() / 32 + 256);
        body.extend_from_slice(ybegin(job, index).as_bytes());
        body.extend_from_slice(ending.as_bytes());
        if job.is_multipart() {
            body.extend_from_slice(ypart(job, index).as_bytes());
            body.extend_from_slice(ending.as_bytes());
        }
        body.extend_from_slice(&yenc::encode_with(raw, ending));
        body.extend_from_slice(yend(job, index, raw.len(), chunk_crc).as_bytes());
        body.extend_from_slice(ending.as_bytes());

        let mut headers = vec![
            ("From", template.from.clone()),
            ("Newsgroups", template.newsgroups.clone()),
            ("Subject", job.subject(&template.prefix, index)),
        ];
        if let Some(poster) = &template.poster {
            headers.push(("X-Newsposter", poster.clone()));
        }
        if template.x_no_archive {
            headers.push(("X-No-Archive", "yes".to_string()));
        }
        let message_id = template
            .message_id_domain
            .as_deref()
            .map(|domain| generate_message_id(domain, index));
        if let Some(id) = &message_id {
            headers.push(("Message-ID", format!("<{}>", id)));
        }
        headers.push(("Date", format_date(chrono::Local::now())));

        Self {
            headers,
            body: Bytes::from(body),
            message_id,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Message-ID sent in the headers, without angle brackets
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Headers, blank line, body, ready for POST
    pub fn to_bytes(&self) -> Vec<u8> {
        let header_len: usize = self.headers.iter().map(|(k, v)| k.len() + v.len() + 3).sum();
        let mut out = Vec::with_capacity(header_len + 1 + self.body.len());
        for (key, value) in &self.headers {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out
    }

    /// Size of the article before dot-stuffing
    pub fn wire_len(&self) -> usize {
        self.headers
            .iter()
            .map(|(k, v)| k.len() + v.len() + 3)
            .sum::<usize>()
            + 1
            + self.body.len()
    }
}

fn ybegin(job: &UploadJob, index: u32) -> String {
    if job.is_multipart() {
        format!(
            "=ybegin part={} total={} line={} size={} name={}",
            index, job.chunk_count, LINE_LENGTH, job.size, job.basename
        )
    } else {
        format!(
            "=ybegin line={} size={} name={}",
            LINE_LENGTH, job.size, job.basename
        )
    }
}

fn ypart(job: &UploadJob, index: u32) -> String {
    let begin = job.chunk_offset(index) + 1;
    let end = (index as u64 * job.article_size as u64).min(job.size);
    format!("=ypart begin={} end={}", begin, end)
}

fn yend(job: &UploadJob, index: u32, raw_len: usize, chunk_crc: u32) -> String {
    if !job.is_multipart() {
        return format!("=yend size={} crc32={}", job.size, yenc::format_crc(job.crc32));
    }

    let mut trailer = format!(
        "=yend size={} part={} pcrc32={}",
        raw_len,
        index,
        yenc::format_crc(chunk_crc)
    );
    if index == job.chunk_count {
        trailer.push_str(" crc32=");
        trailer.push_str(&yenc::format_crc(job.crc32));
    }
    trailer
}

/// RFC 5322 date, e.g. `Tue, 03 Jun 2025 14:07:09 +0200`
pub fn format_date<Tz>(when: chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    when.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}

/// Domain part of the poster address, or a local fallback
fn message_id_domain(from: &str) -> String {
    let address = match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => &from[start + 1..end],
        _ => from.trim(),
    };
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim())
        .filter(|domain| !domain.is_empty() && !domain.contains(char::is_whitespace))
        .unwrap_or("ul-nzb.local")
        .to_string()
}

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_message_id(domain: &str, index: u32) -> String {
    let now = chrono::Utc::now();
    let seq = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "part{}.{}{:09}.{}.{}@{}",
        index,
        now.timestamp(),
        now.timestamp_subsec_nanos(),
        std::process::id(),
        seq,
        domain
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn template() -> ArticleTemplate {
        ArticleTemplate {
            from: "Poster <poster@example.org>".to_string(),
            newsgroups: "alt.binaries.test,alt.binaries.misc".to_string(),
            prefix: String::new(),
            poster: Some("ul-nzb test".to_string()),
            x_no_archive: true,
            line_ending: LineEnding::Lf,
            message_id_domain: None,
        }
    }

    fn job(data: &[u8], article_size: u32) -> UploadJob {
        UploadJob::with_checksum(
            PathBuf::from("file.bin"),
            data.len() as u64,
            yenc::crc32(data),
            article_size,
            None,
        )
        .unwrap()
    }

    fn body_lines(article: &Article) -> Vec<Vec<u8>> {
        let body: &[u8] = article.body();
        let body = body.strip_suffix(b"\n").unwrap_or(body);
        body.split(|&b| b == b'\n').map(<[u8]>::to_vec).collect()
    }

    fn text(line: &[u8]) -> String {
        String::from_utf8_lossy(line).into_owned()
    }

    #[test]
    fn test_single_part_envelope() {
        let data = b"123456789";
        let job = job(data, 128);
        let article = Article::build(&template(), &job, 1, data);
        let lines = body_lines(&article);

        assert_eq!(text(&lines[0]), "=ybegin line=128 size=9 name=file.bin");
        assert!(!lines.iter().any(|l| l.starts_with(b"=ypart")));
        assert_eq!(text(lines.last().unwrap()), "=yend size=9 crc32=cbf43926");
        assert_eq!(article.header("Subject"), Some("\"file.bin\" yEnc (1/1)"));
    }

    #[test]
    fn test_three_part_scenario() {
        let data: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
        let job = job(&data, 128);
        let crc = yenc::format_crc(job.crc32);

        let mut ranges = Vec::new();
        for index in 1..=3 {
            let start = job.chunk_offset(index) as usize;
            let raw = &data[start..start + job.chunk_len(index) as usize];
            let article = Article::build(&template(), &job, index, raw);
            let lines = body_lines(&article);

            assert_eq!(
                article.header("Subject").unwrap(),
                format!("\"file.bin\" yEnc ({}/3)", index)
            );
            assert_eq!(
                text(&lines[0]),
                format!("=ybegin part={} total=3 line=128 size=300 name=file.bin", index)
            );
            ranges.push(text(&lines[1]));

            let trailer = text(lines.last().unwrap());
            let expected = format!(
                "=yend size={} part={} pcrc32={}",
                raw.len(),
                index,
                yenc::format_crc(yenc::crc32(raw))
            );
            if index == 3 {
                assert_eq!(trailer, format!("{} crc32={}", expected, crc));
            } else {
                assert_eq!(trailer, expected);
            }

            let payload = lines[2..lines.len() - 1].join(&b'\n');
            assert_eq!(yenc::decode(&payload).unwrap(), raw);
        }

        assert_eq!(
            ranges,
            vec![
                "=ypart begin=1 end=128",
                "=ypart begin=129 end=256",
                "=ypart begin=257 end=300",
            ]
        );
    }

    #[test]
    fn test_header_block() {
        let data = b"abc";
        let article = Article::build(&template(), &job(data, 128), 1, data);
        let text = String::from_utf8_lossy(&article.to_bytes()).into_owned();
        let (headers, _body) = text.split_once("\n\n").unwrap();

        let names: Vec<&str> = headers.lines().map(|l| l.split(':').next().unwrap()).collect();
        assert_eq!(
            names,
            vec!["From", "Newsgroups", "Subject", "X-Newsposter", "X-No-Archive", "Date"]
        );
        assert_eq!(article.header("x-no-archive"), Some("yes"));
        assert_eq!(article.wire_len(), article.to_bytes().len());
        assert!(article.message_id().is_none());
    }

    #[test]
    fn test_optional_headers_omitted() {
        let mut template = template();
        template.poster = None;
        template.x_no_archive = false;
        let article = Article::build(&template, &job(b"x", 128), 1, b"x");
        assert!(article.header("X-Newsposter").is_none());
        assert!(article.header("X-No-Archive").is_none());
    }

    #[test]
    fn test_generated_message_ids_are_unique() {
        let mut template = template();
        template.message_id_domain = Some("example.org".to_string());
        let job = job(b"x", 128);
        let first = Article::build(&template, &job, 1, b"x");
        let second = Article::build(&template, &job, 1, b"x");

        let id = first.message_id().unwrap();
        assert!(id.ends_with("@example.org"));
        assert_ne!(Some(id), second.message_id());
        assert_eq!(first.header("Message-ID"), Some(format!("<{}>", id).as_str()));
    }

    #[test]
    fn test_message_id_domain() {
        assert_eq!(message_id_domain("Poster <me@example.org>"), "example.org");
        assert_eq!(message_id_domain("me@news.example.net"), "news.example.net");
        assert_eq!(message_id_domain("anonymous"), "ul-nzb.local");
    }

    #[test]
    fn test_date_format() {
        use chrono::TimeZone;
        let when = chrono::FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 3, 14, 7, 9)
            .unwrap();
        assert_eq!(format_date(when), "Tue, 03 Jun 2025 14:07:09 +0200");
    }

    #[test]
    fn test_template_from_config() {
        let mut posting = PostingConfig {
            from: "me@example.org".to_string(),
            groups: vec!["a.b".to_string(), "c.d".to_string()],
            ..PostingConfig::default()
        };
        posting.poster = "  ".to_string();
        posting.generate_message_id = true;

        let template = ArticleTemplate::from_config(&posting);
        assert_eq!(template.newsgroups, "a.b,c.d");
        assert!(template.poster.is_none());
        assert_eq!(template.message_id_domain.as_deref(), Some("example.org"));
    }
}
