//! Stateless fetchers for external content.
//!
//! Retrieves and normalizes page metadata and raw bytes; all calls carry a
//! bounded timeout. Parsing is pure so it can be tested without a network.

use std::time::Duration;

use crate::errors::EnrichError;

const USER_AGENT_DEFAULT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

/// Normalized page metadata plus the raw body for downstream summary work.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
    pub canonical_url: Option<String>,
    pub html: String,
}

/// Fetch a page and extract its metadata within the given budget.
pub fn fetch_page(url: &str, timeout: Duration) -> Result<FetchedPage, EnrichError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT_DEFAULT)
        .build()
        .map_err(|e| EnrichError::Provider(format!("http client init failed: {e}")))?;

    let response = client.get(url).send().map_err(EnrichError::from)?;
    let status = response.status();

    if status.is_server_error() {
        return Err(EnrichError::TransientFetch(format!(
            "{url} answered {status}"
        )));
    }
    if !status.is_success() {
        return Err(EnrichError::Provider(format!("{url} answered {status}")));
    }

    let html = response.text().map_err(EnrichError::from)?;
    let mut page = parse_page(&html);
    page.html = html;
    Ok(page)
}

/// Fetch raw bytes from a URL within the given budget.
pub fn fetch_bytes(url: &str, timeout: Duration) -> Result<Vec<u8>, EnrichError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT_DEFAULT)
        .build()
        .map_err(|e| EnrichError::Provider(format!("http client init failed: {e}")))?;

    let response = client.get(url).send().map_err(EnrichError::from)?;
    let status = response.status();

    if status.is_server_error() {
        return Err(EnrichError::TransientFetch(format!(
            "{url} answered {status}"
        )));
    }
    if !status.is_success() {
        return Err(EnrichError::Provider(format!("{url} answered {status}")));
    }

    Ok(response.bytes().map_err(EnrichError::from)?.to_vec())
}

/// Extract metadata from page HTML.
pub fn parse_page(html: &str) -> FetchedPage {
    let document = scraper::Html::parse_document(html);
    let head_selector = scraper::Selector::parse("head").unwrap();
    let meta_selector = scraper::Selector::parse("meta").unwrap();
    let title_selector = scraper::Selector::parse("title").unwrap();
    let link_selector = scraper::Selector::parse("link").unwrap();

    let mut page = FetchedPage::default();

    let head = match document.select(&head_selector).next() {
        Some(h) => h,
        None => return page,
    };

    for element in head.select(&meta_selector) {
        let meta_prop = element.attr("property").unwrap_or_default();
        let meta_key = element.attr("name").or(Some(meta_prop)).unwrap_or_default();
        let meta_value = element.attr("content").unwrap_or_default().trim();

        if meta_value.is_empty() {
            continue;
        }

        if page.title.is_none() && ["og:title", "twitter:title"].contains(&meta_key) {
            page.title = Some(meta_value.to_string());
        }

        if page.description.is_none()
            && ["description", "og:description", "twitter:description"].contains(&meta_key)
        {
            page.description = Some(meta_value.to_string());
        }

        if page.image_url.is_none() && ["og:image", "twitter:image"].contains(&meta_key) {
            page.image_url = Some(meta_value.to_string());
        }

        if page.site_name.is_none() && meta_key == "og:site_name" {
            page.site_name = Some(meta_value.to_string());
        }

        if page.canonical_url.is_none() && meta_key == "og:url" {
            page.canonical_url = Some(meta_value.to_string());
        }
    }

    if page.title.is_none() {
        page.title = head
            .select(&title_selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());
    }

    if page.canonical_url.is_none() {
        page.canonical_url = head
            .select(&link_selector)
            .find(|l| l.attr("rel") == Some("canonical"))
            .and_then(|l| l.attr("href"))
            .map(|href| href.to_string())
            .filter(|href| !href.is_empty());
    }

    page
}

/// Tags whose subtrees carry no searchable prose.
const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "noscript", "svg", "form", "iframe", "aside",
];

/// Extract readable text from page HTML, dropping boilerplate subtrees and
/// collapsing whitespace. The result is capped by the caller.
pub fn strip_boilerplate(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let mut out = String::new();
    collect_text(document.root_element(), &mut out);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(element: scraper::ElementRef, out: &mut String) {
    if BOILERPLATE_TAGS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        if let Some(child_element) = scraper::ElementRef::wrap(child) {
            collect_text(child_element, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        }
    }
}

/// A sanitized anchor linking back to the source, safe to store as HTML.
pub fn sanitize_anchor(url: &str, title: &str) -> String {
    format!(
        "<a href=\"{}\">{}</a>",
        escape_html(url),
        escape_html(title)
    )
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Host of a URL with any leading "www." stripped.
pub fn source_domain(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

/// Truncate text to a character budget without splitting a char.
pub fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    text.chars().take(budget).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_og_tags() {
        let html = r#"<html><head>
            <meta property="og:title" content="A Page"/>
            <meta property="og:description" content="About things"/>
            <meta property="og:image" content="https://example.com/img.png"/>
            <meta property="og:site_name" content="Example"/>
            <title>fallback title</title>
        </head><body></body></html>"#;

        let page = parse_page(html);
        assert_eq!(page.title.as_deref(), Some("A Page"));
        assert_eq!(page.description.as_deref(), Some("About things"));
        assert_eq!(page.image_url.as_deref(), Some("https://example.com/img.png"));
        assert_eq!(page.site_name.as_deref(), Some("Example"));
    }

    #[test]
    fn test_parse_page_title_fallback() {
        let html = "<html><head><title>Plain Title</title></head><body></body></html>";
        let page = parse_page(html);
        assert_eq!(page.title.as_deref(), Some("Plain Title"));
    }

    #[test]
    fn test_parse_page_meta_description_fallback() {
        let html = r#"<html><head>
            <meta name="description" content="plain description"/>
        </head></html>"#;
        let page = parse_page(html);
        assert_eq!(page.description.as_deref(), Some("plain description"));
    }

    #[test]
    fn test_parse_page_canonical_link() {
        let html = r#"<html><head>
            <link rel="canonical" href="https://example.com/canonical"/>
        </head></html>"#;
        let page = parse_page(html);
        assert_eq!(
            page.canonical_url.as_deref(),
            Some("https://example.com/canonical")
        );
    }

    #[test]
    fn test_parse_page_without_head() {
        let page = parse_page("not really html");
        assert!(page.title.is_none());
        assert!(page.description.is_none());
    }

    #[test]
    fn test_strip_boilerplate_drops_scripts_and_nav() {
        let html = r#"<html><head><style>.x{}</style></head><body>
            <nav>Home About</nav>
            <script>var x = 1;</script>
            <article><p>Real   content here.</p><p>More prose.</p></article>
            <footer>Copyright</footer>
        </body></html>"#;

        let text = strip_boilerplate(html);
        assert_eq!(text, "Real content here. More prose.");
    }

    #[test]
    fn test_sanitize_anchor_escapes() {
        let anchor = sanitize_anchor("https://example.com/?a=1&b=2", "Tom & Jerry <3");
        assert_eq!(
            anchor,
            "<a href=\"https://example.com/?a=1&amp;b=2\">Tom &amp; Jerry &lt;3</a>"
        );
    }

    #[test]
    fn test_source_domain_strips_www() {
        assert_eq!(
            source_domain("https://www.example.com/page"),
            Some("example.com".to_string())
        );
        assert_eq!(
            source_domain("https://docs.rs/scraper"),
            Some("docs.rs".to_string())
        );
        assert_eq!(source_domain("not a url"), None);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
    }
}
