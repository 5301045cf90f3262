//! Attachment classification for rendering.
//!
//! The explicit `type` carried by a message always wins. Only when it is
//! absent does [`classify_content`] look at the content itself: a URL on a
//! known media CDN that points at an image path or a raster extension is an
//! image, any other URL is a document link, everything else is text.

use url::Url;

use crate::constants::{DEFAULT_MEDIA_HOSTS, IMAGE_EXTENSIONS};
use crate::types::{ChatMessage, MessageKind};

/// Hosts whose URLs may be rendered inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHosts {
    hosts: Vec<String>,
}

impl MediaHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// Exact host or any subdomain of it.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|known| {
            host == *known
                || host
                    .strip_suffix(known.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl Default for MediaHosts {
    fn default() -> Self {
        Self::new(DEFAULT_MEDIA_HOSTS)
    }
}

impl ChatMessage {
    pub fn resolved_kind(&self, hosts: &MediaHosts) -> MessageKind {
        self.kind
            .unwrap_or_else(|| classify_content(&self.content, hosts))
    }
}

pub fn classify_content(content: &str, hosts: &MediaHosts) -> MessageKind {
    let content = content.trim();
    if content.contains(char::is_whitespace) {
        return MessageKind::Text;
    }
    let Ok(url) = Url::parse(content) else {
        return MessageKind::Text;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return MessageKind::Text;
    }
    let Some(host) = url.host_str() else {
        return MessageKind::Text;
    };

    if hosts.matches(host) && looks_like_image(url.path()) {
        MessageKind::Image
    } else {
        MessageKind::Document
    }
}

fn looks_like_image(path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    if path.contains("/image/") {
        return true;
    }
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext))
}
