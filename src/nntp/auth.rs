//! Authentication mechanisms and server capabilities

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, NntpError};

/// Authentication scheme used after `MODE READER`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// `AUTHINFO USER` / `AUTHINFO PASS`
    #[default]
    Original,
    /// `AUTHINFO SIMPLE`
    Simple,
    /// `AUTHINFO SASL PLAIN`
    Plain,
    /// `AUTHINFO SASL CRAM-MD5` (RFC 2195)
    CramMd5,
    StartTls,
    External,
    DigestMd5,
    Gssapi,
}

impl AuthMethod {
    pub const ALL: [AuthMethod; 8] = [
        AuthMethod::Original,
        AuthMethod::Simple,
        AuthMethod::Plain,
        AuthMethod::CramMd5,
        AuthMethod::StartTls,
        AuthMethod::External,
        AuthMethod::DigestMd5,
        AuthMethod::Gssapi,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AuthMethod::Original => "original",
            AuthMethod::Simple => "simple",
            AuthMethod::Plain => "plain",
            AuthMethod::CramMd5 => "cram-md5",
            AuthMethod::StartTls => "starttls",
            AuthMethod::External => "external",
            AuthMethod::DigestMd5 => "digest-md5",
            AuthMethod::Gssapi => "gssapi",
        }
    }

    pub fn is_implemented(self) -> bool {
        matches!(
            self,
            AuthMethod::Original | AuthMethod::Simple | AuthMethod::Plain | AuthMethod::CramMd5
        )
    }

    /// Name of the mechanism in a `SASL` capability line, if it is a SASL mechanism
    pub fn sasl_name(self) -> Option<&'static str> {
        match self {
            AuthMethod::Plain => Some("PLAIN"),
            AuthMethod::CramMd5 => Some("CRAM-MD5"),
            AuthMethod::External => Some("EXTERNAL"),
            AuthMethod::DigestMd5 => Some("DIGEST-MD5"),
            AuthMethod::Gssapi => Some("GSSAPI"),
            AuthMethod::Original | AuthMethod::Simple | AuthMethod::StartTls => None,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuthMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        AuthMethod::ALL
            .into_iter()
            .find(|method| method.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownAuthMethod(s.to_string()))
    }
}

/// Parsed `CAPABILITIES` response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: BTreeMap<String, Vec<String>>,
}

impl Capabilities {
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut entries = BTreeMap::new();
        for line in lines {
            let mut words = line.as_ref().split_whitespace();
            if let Some(label) = words.next() {
                entries.insert(
                    label.to_ascii_uppercase(),
                    words.map(str::to_string).collect(),
                );
            }
        }
        Self { entries }
    }

    pub fn has(&self, label: &str) -> bool {
        self.entries.contains_key(&label.to_ascii_uppercase())
    }

    pub fn arguments(&self, label: &str) -> &[String] {
        self.entries
            .get(&label.to_ascii_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn can_post(&self) -> bool {
        self.has("POST")
    }

    /// Authentication methods the server advertises
    pub fn auth_methods(&self) -> Vec<AuthMethod> {
        let authinfo = self.arguments("AUTHINFO");
        let sasl = self.arguments("SASL");
        AuthMethod::ALL
            .into_iter()
            .filter(|method| match method {
                AuthMethod::Original => authinfo.iter().any(|a| a.eq_ignore_ascii_case("USER")),
                AuthMethod::StartTls => self.has("STARTTLS"),
                AuthMethod::Simple => false,
                other => other
                    .sasl_name()
                    .is_some_and(|name| sasl.iter().any(|m| m.eq_ignore_ascii_case(name))),
            })
            .collect()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Initial response for `AUTHINFO SASL PLAIN`
pub(crate) fn sasl_plain_token(user: &str, secret: &str) -> String {
    STANDARD.encode(format!("\0{}\0{}", user, secret))
}

/// Client response to a base64 CRAM-MD5 challenge
pub(crate) fn cram_md5_response(
    user: &str,
    secret: &str,
    challenge_b64: &str,
) -> Result<String, NntpError> {
    let challenge = STANDARD
        .decode(challenge_b64.trim())
        .map_err(|e| NntpError::ProtocolError(format!("Invalid CRAM-MD5 challenge: {}", e)))?;

    let mut key = if secret.len() > 64 {
        md5::compute(secret.as_bytes()).0.to_vec()
    } else {
        secret.as_bytes().to_vec()
    };
    key.resize(64, 0);

    let ipad: Vec<u8> = key.iter().map(|b| b ^ 0x36).collect();
    let opad: Vec<u8> = key.iter().map(|b| b ^ 0x5c).collect();

    let mut inner = md5::Context::new();
    inner.consume(&ipad);
    inner.consume(&challenge);
    let inner = inner.compute();

    let mut outer = md5::Context::new();
    outer.consume(&opad);
    outer.consume(inner.0);
    let digest = outer.compute();

    Ok(STANDARD.encode(format!("{} {:x}", user, digest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names_round_trip() {
        for method in AuthMethod::ALL {
            assert_eq!(method.name().parse::<AuthMethod>().unwrap(), method);
        }
        assert_eq!("ORIGINAL".parse::<AuthMethod>().unwrap(), AuthMethod::Original);
        assert!("kerberos".parse::<AuthMethod>().is_err());
    }

    #[test]
    fn test_stub_methods_not_implemented() {
        assert!(AuthMethod::Original.is_implemented());
        assert!(!AuthMethod::StartTls.is_implemented());
        assert!(!AuthMethod::DigestMd5.is_implemented());
        assert!(!AuthMethod::Gssapi.is_implemented());
        assert!(!AuthMethod::External.is_implemented());
    }

    #[test]
    fn test_capabilities_parsing() {
        let caps = Capabilities::parse(&[
            "VERSION 2",
            "READER",
            "POST",
            "AUTHINFO USER",
            "SASL PLAIN CRAM-MD5",
        ]);
        assert!(caps.can_post());
        assert!(caps.has("reader"));
        assert_eq!(caps.arguments("VERSION"), ["2".to_string()]);
        assert_eq!(
            caps.auth_methods(),
            vec![AuthMethod::Original, AuthMethod::Plain, AuthMethod::CramMd5]
        );
    }

    #[test]
    fn test_sasl_plain_token() {
        assert_eq!(sasl_plain_token("user", "pass"), "AHVzZXIAcGFzcw==");
    }

    #[test]
    fn test_cram_md5_rfc2195_vector() {
        let response = cram_md5_response(
            "tim",
            "tanstaaftanstaaf",
            "PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+",
        )
        .unwrap();
        assert_eq!(response, "dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw");
    }
}
