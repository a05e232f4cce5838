//! HTTP plumbing shared by the vendor scanners
//!
//! A session keeps the negotiated auth (Basic or Digest) across requests and
//! replays redirects itself so the digest nonce state survives the hop.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, AUTHORIZATION, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Client, Method, StatusCode, Url};

use crate::ipcam_scan::types::PlainCredential;

const MAX_REDIRECTS: usize = 5;

/// Probe-local failure; never leaves a scanner
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(String),

    #[error("too many redirects")]
    TooManyRedirects,
}

/// Response with the body already read
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    location: Option<String>,
    challenges: Vec<String>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_auth_failure(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED || self.status == StatusCode::FORBIDDEN
    }

    pub fn text(&self) -> String {
        decode_body(&self.body, self.content_type.as_deref())
    }
}

// ========================================
// Digest auth (RFC 2617)
// ========================================

/// Parsed `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    pub qop: Option<String>,
}

impl DigestChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut challenge = DigestChallenge::default();
        for (key, value) in parse_auth_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => challenge.realm = value,
                "nonce" => challenge.nonce = value,
                "opaque" => challenge.opaque = Some(value),
                "algorithm" => challenge.algorithm = Some(value),
                "qop" => challenge.qop = Some(value),
                _ => {}
            }
        }

        if challenge.nonce.is_empty() {
            return None;
        }
        Some(challenge)
    }

    fn supports_qop_auth(&self) -> bool {
        self.qop
            .as_deref()
            .map_or(false, |q| q.split(',').any(|t| t.trim().eq_ignore_ascii_case("auth")))
    }
}

/// `key=value` / `key="quoted, value"` pairs of an auth header
fn parse_auth_params(s: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next().is_none() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        out.push((key.trim().to_string(), value.trim().to_string()));
    }

    out
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Authorization header value answering `challenge`
pub fn digest_response(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce_count: u32,
    cnonce: &str,
) -> String {
    let mut ha1 = md5_hex(&format!("{}:{}:{}", username, challenge.realm, password));
    if challenge
        .algorithm
        .as_deref()
        .map_or(false, |a| a.eq_ignore_ascii_case("MD5-sess"))
    {
        ha1 = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, cnonce));
    }
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    let nc = format!("{:08x}", nonce_count);

    let qop_auth = challenge.supports_qop_auth();
    let response = if qop_auth {
        md5_hex(&format!("{}:{}:{}:{}:auth:{}", ha1, challenge.nonce, nc, cnonce, ha2))
    } else {
        md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
    };

    let mut header = format!(
        r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}""#,
        username.replace('"', "\\\""),
        challenge.realm,
        challenge.nonce,
        uri,
        response
    );
    if let Some(algorithm) = &challenge.algorithm {
        header.push_str(&format!(", algorithm={}", algorithm));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(r#", opaque="{}""#, opaque));
    }
    if qop_auth {
        header.push_str(&format!(r#", qop=auth, nc={}, cnonce="{}""#, nc, cnonce));
    }
    header
}

fn new_cnonce() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ========================================
// Session
// ========================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthState {
    None,
    Basic,
    Digest(DigestChallenge),
}

/// Pick Digest over Basic from the offered challenges
fn negotiate(challenges: &[String]) -> Option<AuthState> {
    if let Some(digest) = challenges.iter().find_map(|c| DigestChallenge::parse(c)) {
        return Some(AuthState::Digest(digest));
    }
    challenges
        .iter()
        .any(|c| c.trim_start().to_ascii_lowercase().starts_with("basic"))
        .then_some(AuthState::Basic)
}

/// Client bound to one credential (or none) for a run of related requests
pub struct HttpSession<'a> {
    client: Client,
    credential: Option<&'a PlainCredential>,
    auth: AuthState,
    nonce_count: u32,
}

impl<'a> HttpSession<'a> {
    pub fn new(timeout: Duration, credential: Option<&'a PlainCredential>) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            credential,
            auth: AuthState::None,
            nonce_count: 0,
        })
    }

    pub async fn get(&mut self, url: &str) -> Result<HttpReply, ProbeError> {
        self.send(Method::GET, url, None).await
    }

    pub async fn post(
        &mut self,
        url: &str,
        content_type: &'static str,
        body: String,
    ) -> Result<HttpReply, ProbeError> {
        self.send(Method::POST, url, Some((content_type, body))).await
    }

    /// Send with auth negotiation, replaying redirects inside this session
    pub async fn send(
        &mut self,
        method: Method,
        url: &str,
        body: Option<(&'static str, String)>,
    ) -> Result<HttpReply, ProbeError> {
        let mut url = Url::parse(url).map_err(|e| ProbeError::Url(e.to_string()))?;
        let mut method = method;
        let mut body = body;

        for _ in 0..=MAX_REDIRECTS {
            let reply = self.send_once(&method, &url, body.as_ref()).await?;

            if reply.status.is_redirection() {
                if let Some(next) = reply.location.as_deref().and_then(|l| url.join(l).ok()) {
                    tracing::trace!(from = %url, to = %next, status = %reply.status, "Replaying redirect");
                    if reply.status == StatusCode::SEE_OTHER {
                        method = Method::GET;
                        body = None;
                    }
                    // Credentials never follow a redirect to another origin
                    if next.origin() != url.origin() && self.credential.is_some() {
                        tracing::debug!(from = %url, to = %next, "Cross-origin redirect, dropping credentials");
                        self.credential = None;
                        self.auth = AuthState::None;
                    }
                    url = next;
                    continue;
                }
            }

            return Ok(reply);
        }

        Err(ProbeError::TooManyRedirects)
    }

    async fn send_once(
        &mut self,
        method: &Method,
        url: &Url,
        body: Option<&(&'static str, String)>,
    ) -> Result<HttpReply, ProbeError> {
        let header = self.authorization(method, url);
        let sent_auth = header.is_some();
        let reply = self.dispatch(method, url, body, header).await?;

        if reply.status != StatusCode::UNAUTHORIZED || self.credential.is_none() {
            return Ok(reply);
        }
        let Some(next) = negotiate(&reply.challenges) else {
            return Ok(reply);
        };

        // Same scheme and nonce again means the credential was rejected
        let stale = match (&self.auth, &next) {
            (AuthState::Digest(old), AuthState::Digest(new)) => old.nonce != new.nonce,
            (AuthState::Basic, AuthState::Basic) => false,
            _ => true,
        };
        if sent_auth && !stale {
            return Ok(reply);
        }

        self.auth = next;
        self.nonce_count = 0;
        let header = self.authorization(method, url);
        self.dispatch(method, url, body, header).await
    }

    fn authorization(&mut self, method: &Method, url: &Url) -> Option<String> {
        let credential = self.credential?;

        match &self.auth {
            AuthState::None => None,
            AuthState::Basic => {
                let token = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", credential.username, credential.password));
                Some(format!("Basic {}", token))
            }
            AuthState::Digest(challenge) => {
                self.nonce_count += 1;
                let mut uri = url.path().to_string();
                if let Some(query) = url.query() {
                    uri.push('?');
                    uri.push_str(query);
                }
                Some(digest_response(
                    challenge,
                    &credential.username,
                    &credential.password,
                    method.as_str(),
                    &uri,
                    self.nonce_count,
                    &new_cnonce(),
                ))
            }
        }
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&(&'static str, String)>,
        authorization: Option<String>,
    ) -> Result<HttpReply, ProbeError> {
        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        if let Some((content_type, payload)) = body {
            request = request.header(CONTENT_TYPE, *content_type).body(payload.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers();
        let content_type = header_text(headers, CONTENT_TYPE);
        let location = header_text(headers, LOCATION);
        let challenges = headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(HttpReply {
            status,
            content_type,
            body,
            location,
            challenges,
        })
    }
}

fn header_text(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// ========================================
// Body helpers
// ========================================

/// Charset named in a Content-Type, lowercased, with "utf8" spelled "utf-8"
fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let charset = value.trim().trim_matches('"').trim().to_ascii_lowercase();
        Some(if charset == "utf8" { "utf-8".to_string() } else { charset })
    })
}

/// Decode a body per its declared charset; unknown charsets fall back to lossy UTF-8
pub fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    let charset = content_type.and_then(charset_of);

    match charset.as_deref() {
        Some("iso-8859-1") | Some("latin1") | Some("us-ascii") => {
            body.iter().map(|&b| b as char).collect()
        }
        _ => {
            let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
            String::from_utf8_lossy(body).into_owned()
        }
    }
}

/// Newline-delimited `key=value` pairs, keys lowercased
pub fn parse_key_values(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.split('\n') {
        let line = line.trim();
        match line.find('=') {
            Some(idx) if idx > 0 => {
                map.insert(
                    line[..idx].trim().to_ascii_lowercase(),
                    line[idx + 1..].trim().to_string(),
                );
            }
            _ => {}
        }
    }
    map
}

/// Join a value with an optional suffix in parentheses
pub(crate) fn with_suffix(value: Option<String>, suffix: Option<String>) -> Option<String> {
    match (value, suffix) {
        (Some(v), Some(s)) => Some(format!("{} ({})", v, s)),
        (v, _) => v,
    }
}

/// Trimmed, non-empty
pub(crate) fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
