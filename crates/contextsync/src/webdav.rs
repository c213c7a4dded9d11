//! WebDAV [`DocumentSource`]: `PROPFIND` (depth 1) for listings, `GET`
//! for content.
//!
//! Safety properties:
//! - Hard per-request timeout (`context.request_timeout_ms`)
//! - Files above `context.max_file_bytes` are refused, both by the
//!   advertised size and while streaming the body
//! - Redirect limit (5 hops)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};

use leitl_domain::config::ContextConfig;

use crate::{Credentials, DocumentSource, RemoteEntry, SyncError};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:getcontentlength/>
    <d:getcontenttype/>
    <d:getlastmodified/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

pub struct WebDavSource {
    client: Client,
    user_agent: String,
    max_file_bytes: u64,
}

impl WebDavSource {
    pub fn new(cfg: &ContextConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(cfg.request_timeout())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| SyncError::Transport(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            user_agent: cfg.user_agent.clone(),
            max_file_bytes: cfg.max_file_bytes,
        })
    }

    fn decorate(&self, rb: RequestBuilder, credentials: Option<&Credentials>) -> RequestBuilder {
        let rb = rb.header(USER_AGENT, &self.user_agent);
        match credentials {
            Some(c) => rb.basic_auth(&c.username, Some(&c.password)),
            None => rb,
        }
    }
}

#[async_trait]
impl DocumentSource for WebDavSource {
    async fn list(
        &self,
        source_url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<RemoteEntry>, SyncError> {
        let base = Url::parse(source_url)
            .map_err(|e| SyncError::Malformed(format!("source url `{source_url}`: {e}")))?;
        let propfind = Method::from_bytes(b"PROPFIND")
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let rb = self
            .client
            .request(propfind, base.clone())
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);
        let resp = self
            .decorate(rb, credentials)
            .send()
            .await
            .map_err(transport_error)?;

        check_status(resp.status())?;
        let body = resp.text().await.map_err(transport_error)?;
        let entries = parse_multistatus(&body, &base)?;

        tracing::debug!(source = %base, files = entries.len(), "webdav listing parsed");
        Ok(entries)
    }

    async fn fetch(
        &self,
        entry: &RemoteEntry,
        credentials: Option<&Credentials>,
    ) -> Result<String, SyncError> {
        if entry.size_bytes > self.max_file_bytes {
            return Err(SyncError::TooLarge {
                size: entry.size_bytes,
                limit: self.max_file_bytes,
            });
        }

        let resp = self
            .decorate(self.client.get(&entry.url), credentials)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp.status())?;

        // Stream body with hard byte cap; the advertised size may be stale.
        let mut stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport_error)?;
            if (buf.len() + chunk.len()) as u64 > self.max_file_bytes {
                return Err(SyncError::TooLarge {
                    size: (buf.len() + chunk.len()) as u64,
                    limit: self.max_file_bytes,
                });
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn transport_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout(e.to_string())
    } else {
        SyncError::Transport(e.to_string())
    }
}

fn check_status(status: StatusCode) -> Result<(), SyncError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Auth(status.to_string())),
        s if s.is_success() => Ok(()),
        s => Err(SyncError::Http {
            status: s.as_u16(),
            message: s.canonical_reason().unwrap_or("unexpected status").to_owned(),
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Multistatus parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct PartialEntry {
    href: Option<String>,
    display_name: Option<String>,
    content_length: Option<u64>,
    content_type: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    is_collection: bool,
}

/// Parse a `207 Multi-Status` body into file entries.  Element names are
/// matched on their local part so any namespace prefix works.  The
/// collection itself and any sub-collections are skipped.
pub fn parse_multistatus(xml: &str, base: &Url) -> Result<Vec<RemoteEntry>, SyncError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<PartialEntry> = None;
    let mut element = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SyncError::Malformed(format!("at byte {}: {e}", reader.buffer_position())))?;
        match event {
            XmlEvent::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "response" => current = Some(PartialEntry::default()),
                    "collection" => {
                        if let Some(p) = current.as_mut() {
                            p.is_collection = true;
                        }
                    }
                    _ => {}
                }
                element = name;
            }
            XmlEvent::Empty(e) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(p) = current.as_mut() {
                        p.is_collection = true;
                    }
                }
            }
            XmlEvent::Text(t) => {
                let Some(p) = current.as_mut() else { continue };
                let text = t
                    .unescape()
                    .map_err(|e| SyncError::Malformed(e.to_string()))?
                    .trim()
                    .to_owned();
                match element.as_str() {
                    "href" => p.href = Some(text),
                    "displayname" => p.display_name = Some(text),
                    "getcontentlength" => p.content_length = text.parse().ok(),
                    "getcontenttype" => p.content_type = Some(text),
                    "getlastmodified" => {
                        p.last_modified = DateTime::parse_from_rfc2822(&text)
                            .ok()
                            .map(|d| d.with_timezone(&Utc));
                    }
                    _ => {}
                }
            }
            XmlEvent::End(e) => {
                if e.local_name().as_ref() == b"response" {
                    if let Some(p) = current.take() {
                        if let Some(entry) = finish_entry(p, base)? {
                            entries.push(entry);
                        }
                    }
                }
                element.clear();
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

fn finish_entry(p: PartialEntry, base: &Url) -> Result<Option<RemoteEntry>, SyncError> {
    let Some(href) = p.href else {
        return Err(SyncError::Malformed("response without href".into()));
    };
    if p.is_collection {
        return Ok(None);
    }

    let url = base
        .join(&href)
        .map_err(|e| SyncError::Malformed(format!("href `{href}`: {e}")))?;
    if url.path().trim_end_matches('/') == base.path().trim_end_matches('/') {
        return Ok(None);
    }

    let decoded = urlencoding::decode_binary(url.path().as_bytes());
    let path = String::from_utf8_lossy(&decoded).into_owned();
    let name = p
        .display_name
        .filter(|n| !n.is_empty())
        .or_else(|| path.rsplit('/').find(|s| !s.is_empty()).map(str::to_owned))
        .unwrap_or_default();

    Ok(Some(RemoteEntry {
        name,
        path,
        url: url.to_string(),
        size_bytes: p.content_length.unwrap_or(0),
        content_type: p.content_type,
        last_modified: p.last_modified,
    }))
}
