//! Text-mode browsing engine behind the agent.
//!
//! `BrowserEngine` is the seam the driver talks to; [`HttpEngine`] is the
//! production implementation: plain HTTP fetches with title, text, and
//! link extraction. No JavaScript. Pages that need it still yield their
//! server-rendered markup, which is what the model reasons over.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::snapshot;
use crate::config::AgentConfig;

/// Raw HTML kept per page before stripping, in bytes.
const RAW_HTML_CAP: usize = 262_144;
/// Links surfaced per page.
const MAX_LINKS: usize = 200;

#[derive(Debug, Clone)]
pub struct PageLink {
    pub text: String,
    pub href: String,
}

/// What the engine saw after loading a page.
#[derive(Debug, Clone)]
pub struct PageView {
    pub url: String,
    pub status: u16,
    pub title: String,
    pub text: String,
    pub links: Vec<PageLink>,
}

impl PageView {
    pub fn from_html(url: String, status: u16, html: &str) -> Self {
        let html = if html.len() > RAW_HTML_CAP {
            let mut cut = RAW_HTML_CAP;
            while !html.is_char_boundary(cut) {
                cut -= 1;
            }
            &html[..cut]
        } else {
            html
        };
        Self {
            url,
            status,
            title: extract_title(html),
            text: strip_tags(html),
            links: extract_links(html),
        }
    }

    /// First `max_chars` of page text, cut on a char boundary.
    pub fn excerpt(&self, max_chars: usize) -> &str {
        if self.text.len() <= max_chars {
            return &self.text;
        }
        let mut cut = max_chars;
        while !self.text.is_char_boundary(cut) {
            cut -= 1;
        }
        &self.text[..cut]
    }
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Load a page by URL.
    async fn navigate(&mut self, url: &str) -> Result<PageView>;

    /// Follow a link on the current page by its visible text.
    async fn follow(&mut self, link_text: &str) -> Result<PageView>;

    /// The page currently loaded, if any.
    fn current(&self) -> Option<&PageView>;

    /// PNG capture of the current page.
    fn render_current(&self) -> Result<Vec<u8>>;
}

/// HTTP-backed engine. One instance per task run.
pub struct HttpEngine {
    client: reqwest::Client,
    state: Option<PageView>,
}

impl HttpEngine {
    pub fn new(cfg: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.step_timeout_secs))
            .user_agent(cfg.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("failed to build page fetch client")?;
        Ok(Self {
            client,
            state: None,
        })
    }

    async fn fetch(&mut self, url: &str) -> Result<PageView> {
        let url = normalize_url(url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let html = resp
            .text()
            .await
            .with_context(|| format!("failed to read body of {url}"))?;
        let view = PageView::from_html(final_url, status, &html);
        self.state = Some(view.clone());
        Ok(view)
    }
}

#[async_trait]
impl BrowserEngine for HttpEngine {
    async fn navigate(&mut self, url: &str) -> Result<PageView> {
        self.fetch(url).await
    }

    async fn follow(&mut self, link_text: &str) -> Result<PageView> {
        let (base, href) = {
            let page = match &self.state {
                Some(p) => p,
                None => bail!("no page loaded yet"),
            };
            let wanted = link_text.trim();
            let found = page
                .links
                .iter()
                .find(|l| l.text.eq_ignore_ascii_case(wanted))
                .or_else(|| {
                    page.links
                        .iter()
                        .find(|l| l.text.to_lowercase().contains(&wanted.to_lowercase()))
                });
            match found {
                Some(link) => (page.url.clone(), link.href.clone()),
                None => bail!("no link matching '{wanted}' on the current page"),
            }
        };
        let resolved = resolve_href(&base, &href)?;
        self.fetch(&resolved).await
    }

    fn current(&self) -> Option<&PageView> {
        self.state.as_ref()
    }

    fn render_current(&self) -> Result<Vec<u8>> {
        match &self.state {
            Some(p) => snapshot::render_page(&p.url, &p.title, &p.text),
            None => bail!("no page loaded yet"),
        }
    }
}

fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

fn resolve_href(base: &str, href: &str) -> Result<String> {
    let base = reqwest::Url::parse(base).with_context(|| format!("bad base url {base}"))?;
    let joined = base
        .join(href)
        .with_context(|| format!("bad link target {href}"))?;
    Ok(joined.to_string())
}

/// ASCII-case-insensitive substring search. Byte offsets returned are
/// always char boundaries because the needles are ASCII.
fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let ned = needle.as_bytes();
    if ned.is_empty() || from >= hay.len() {
        return None;
    }
    hay[from..]
        .windows(ned.len())
        .position(|w| w.eq_ignore_ascii_case(ned))
        .map(|i| i + from)
}

pub fn extract_title(html: &str) -> String {
    let Some(open) = find_ci(html, "<title", 0) else {
        return String::new();
    };
    let Some(gt) = html[open..].find('>').map(|i| open + i + 1) else {
        return String::new();
    };
    let Some(close) = find_ci(html, "</title>", gt) else {
        return String::new();
    };
    decode_entities(html[gt..close].trim())
}

/// Visible text of a page: script/style blocks dropped, tags stripped,
/// entities decoded, whitespace collapsed.
pub fn strip_tags(html: &str) -> String {
    let html = remove_blocks(html, "script");
    let html = remove_blocks(&html, "style");

    let mut out = String::with_capacity(html.len() / 4);
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }

    let decoded = decode_entities(&out);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn remove_blocks(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(start) = find_ci(html, &open, pos) {
        out.push_str(&html[pos..start]);
        match find_ci(html, &close, start) {
            Some(end) => pos = end + close.len(),
            None => {
                // unterminated block swallows the rest
                return out;
            }
        }
    }
    out.push_str(&html[pos..]);
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Anchor tags with an href and visible text, in document order.
pub fn extract_links(html: &str) -> Vec<PageLink> {
    let mut links = Vec::new();
    let mut pos = 0;
    while links.len() < MAX_LINKS {
        let Some(a_start) = find_ci(html, "<a", pos) else {
            break;
        };
        // require a tag boundary so "<article>" is not an anchor
        let after = html.as_bytes().get(a_start + 2).copied();
        if !matches!(after, Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'>')) {
            pos = a_start + 2;
            continue;
        }
        let Some(tag_end) = html[a_start..].find('>').map(|i| a_start + i) else {
            break;
        };
        let Some(close) = find_ci(html, "</a>", tag_end) else {
            pos = tag_end + 1;
            continue;
        };

        let attrs = &html[a_start..tag_end];
        let inner = &html[tag_end + 1..close];
        if let Some(href) = extract_attr(attrs, "href") {
            let text = strip_tags(inner);
            if !text.is_empty() && !href.is_empty() {
                links.push(PageLink { text, href });
            }
        }
        pos = close + 4;
    }
    links
}

fn extract_attr(tag: &str, name: &str) -> Option<String> {
    let key = format!("{name}=");
    let at = find_ci(tag, &key, 0)? + key.len();
    let rest = &tag[at..];
    let mut chars = rest.chars();
    match chars.next()? {
        quote @ ('"' | '\'') => {
            let body: String = chars.take_while(|&c| c != quote).collect();
            Some(decode_entities(&body))
        }
        first => {
            let mut body = String::new();
            body.push(first);
            body.extend(chars.take_while(|c| !c.is_whitespace() && *c != '>'));
            Some(decode_entities(&body))
        }
    }
}
