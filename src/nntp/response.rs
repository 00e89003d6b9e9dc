//! NNTP status line parsing and reply-code classification

use std::fmt;

use crate::error::{ErrorClass, NntpError};

/// Reply codes the poster cares about
pub mod codes {
    pub const CAPABILITIES_FOLLOW: u16 = 101;
    pub const READY_POSTING_ALLOWED: u16 = 200;
    pub const READY_NO_POSTING: u16 = 201;
    pub const CLOSING: u16 = 205;
    pub const ARTICLE_EXISTS: u16 = 223;
    pub const ARTICLE_POSTED: u16 = 240;
    pub const AUTH_ACCEPTED: u16 = 281;
    pub const SEND_ARTICLE: u16 = 340;
    pub const PASSWORD_REQUIRED: u16 = 381;
    pub const SASL_CONTINUE: u16 = 383;
    pub const NO_SUCH_GROUP: u16 = 411;
    pub const NO_SUCH_ARTICLE: u16 = 430;
    pub const ARTICLE_REJECTED: u16 = 437;
    pub const POSTING_NOT_ALLOWED: u16 = 440;
    pub const POSTING_FAILED: u16 = 441;
    pub const AUTH_REQUIRED: u16 = 480;
    pub const AUTH_REJECTED: u16 = 481;
    pub const AUTH_OUT_OF_SEQUENCE: u16 = 482;
    pub const UNKNOWN_COMMAND: u16 = 500;
    pub const SYNTAX_ERROR: u16 = 501;
    pub const ACCESS_DENIED: u16 = 502;
}

/// What an error reply means for the poster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCategory {
    /// 411: a configured newsgroup does not exist
    InvalidGroup,
    /// 430: benign during STAT, the server may simply be lagging
    ArticleNotFound,
    /// 437: usually the article is too big
    ArticleRejected,
    /// 440: kept retryable, although most servers mean it permanently
    PostingNotAllowed,
    /// 441
    PostingFailed,
    /// 450/452
    AuthRejected,
    /// 500/501/502
    ProtocolError,
    Unknown,
}

impl ResponseCategory {
    pub fn from_code(code: u16) -> Self {
        match code {
            codes::NO_SUCH_GROUP => ResponseCategory::InvalidGroup,
            codes::NO_SUCH_ARTICLE => ResponseCategory::ArticleNotFound,
            codes::ARTICLE_REJECTED => ResponseCategory::ArticleRejected,
            codes::POSTING_NOT_ALLOWED => ResponseCategory::PostingNotAllowed,
            codes::POSTING_FAILED => ResponseCategory::PostingFailed,
            450 | 452 => ResponseCategory::AuthRejected,
            codes::UNKNOWN_COMMAND | codes::SYNTAX_ERROR | codes::ACCESS_DENIED => {
                ResponseCategory::ProtocolError
            }
            _ => ResponseCategory::Unknown,
        }
    }

    pub fn class(self) -> ErrorClass {
        match self {
            ResponseCategory::InvalidGroup | ResponseCategory::ProtocolError => {
                ErrorClass::PostingFatal
            }
            ResponseCategory::AuthRejected => ErrorClass::Authentication,
            ResponseCategory::ArticleNotFound
            | ResponseCategory::ArticleRejected
            | ResponseCategory::PostingNotAllowed
            | ResponseCategory::PostingFailed
            | ResponseCategory::Unknown => ErrorClass::PostingTransient,
        }
    }

    /// Human-readable explanation logged next to the raw reply
    pub fn describe(self) -> &'static str {
        match self {
            ResponseCategory::InvalidGroup => "Invalid newsgroup specified",
            ResponseCategory::ArticleNotFound => "No such article, maybe the server is lagging",
            ResponseCategory::ArticleRejected => "Article rejected by server, maybe it's too big",
            ResponseCategory::PostingNotAllowed => "Posting not allowed",
            ResponseCategory::PostingFailed => "Posting failed",
            ResponseCategory::AuthRejected => "Not authorized or wrong username/password",
            ResponseCategory::ProtocolError => "Command rejected by server",
            ResponseCategory::Unknown => "Unexpected server reply",
        }
    }
}

/// One parsed status reply, including any `xyz-` continuation lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NntpResponse {
    pub code: u16,
    pub text: String,
    pub continuation: Vec<String>,
}

impl NntpResponse {
    /// Parse a single status line (CRLF already stripped)
    pub fn parse(line: &str) -> Result<Self, NntpError> {
        let code = line
            .get(..3)
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<u16>().ok())
            .ok_or_else(|| NntpError::ProtocolError(format!("Malformed status line: {:?}", line)))?;

        let text = line.get(4..).unwrap_or("").to_string();
        Ok(Self {
            code,
            text,
            continuation: Vec::new(),
        })
    }

    /// Whether the 4th character of a raw status line marks a continuation
    pub fn continues(line: &str) -> bool {
        line.as_bytes().get(3) == Some(&b'-')
    }

    pub fn is_success(&self) -> bool {
        (100..300).contains(&self.code)
    }

    pub fn is_continue(&self) -> bool {
        (300..400).contains(&self.code)
    }

    pub fn category(&self) -> ResponseCategory {
        ResponseCategory::from_code(self.code)
    }

    /// Message-id of a posted article, taken from the `<...>` token of the reply
    pub fn message_id(&self) -> Option<String> {
        std::iter::once(self.text.as_str())
            .chain(self.continuation.iter().map(String::as_str))
            .find_map(extract_message_id)
    }

    /// Convert an unexpected reply into an error
    pub fn into_error(self) -> NntpError {
        if self.code >= 400 {
            NntpError::ServerError {
                category: self.category(),
                code: self.code,
                message: self.text,
            }
        } else {
            NntpError::ProtocolError(format!("Unexpected reply: {}", self))
        }
    }
}

impl fmt::Display for NntpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

fn extract_message_id(text: &str) -> Option<String> {
    let start = text.find('<')?;
    let rest = &text[start + 1..];
    let end = rest.find('>')?;
    let id = &rest[..end];
    (!id.is_empty()).then(|| id.to_string())
}
