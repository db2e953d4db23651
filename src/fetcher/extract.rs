use std::collections::HashSet;
use std::sync::LazyLock;

use html_escape::decode_html_entities;
use regex::Regex;
use url::Url;

use crate::domain::{ArticleContent, ImageRef};

static IMG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("static pattern"));

static SRC_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s(data-src|src)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#)
        .expect("static pattern")
});

/// Enumerates the images an article needs for offline reading.
#[derive(Debug, Clone, Default)]
pub struct ImageExtractor;

impl ImageExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Images referenced by `<img>` tags, in document order without duplicates.
    ///
    /// `data-src` wins over `src` (lazy-loaded pages put a placeholder in
    /// `src`). Relative URLs resolve against the article key; `data:` URIs are
    /// skipped since they are already inline.
    pub fn images(&self, article: &ArticleContent) -> Vec<ImageRef> {
        let base = Url::parse(&article.key).ok();
        let mut seen = HashSet::new();
        let mut images = Vec::new();

        for tag in IMG_TAG.find_iter(&article.html) {
            let Some(raw) = Self::source_of(tag.as_str()) else {
                continue;
            };
            let Some(url) = Self::resolve(base.as_ref(), &raw) else {
                continue;
            };
            if seen.insert(url.clone()) {
                images.push(ImageRef::new(article.key.clone(), url));
            }
        }

        images
    }

    fn source_of(tag: &str) -> Option<String> {
        let mut src = None;
        for caps in SRC_ATTR.captures_iter(tag) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| decode_html_entities(m.as_str().trim()).to_string())
                .filter(|v| !v.is_empty());
            if caps[1].eq_ignore_ascii_case("data-src") && value.is_some() {
                return value;
            }
            if src.is_none() {
                src = value;
            }
        }
        src
    }

    fn resolve(base: Option<&Url>, raw: &str) -> Option<String> {
        if raw.starts_with("data:") {
            return None;
        }
        let url = match base {
            Some(base) => base.join(raw).ok()?,
            None => Url::parse(raw).ok()?,
        };
        matches!(url.scheme(), "http" | "https").then(|| url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(html: &str) -> Vec<String> {
        let article = ArticleContent::new("https://en.wikipedia.org/wiki/Crab", html);
        ImageExtractor::new()
            .images(&article)
            .into_iter()
            .map(|i| i.url)
            .collect()
    }

    #[test]
    fn test_no_images() {
        assert!(urls("<p>just text</p>").is_empty());
    }

    #[test]
    fn test_absolute_and_relative_sources() {
        let found = urls(
            r#"<img src="https://upload.wikimedia.org/a.jpg">
               <IMG class="thumb" SRC='/static/b.png' alt="b">
               <img src=//upload.wikimedia.org/c.jpg>"#,
        );
        assert_eq!(
            found,
            vec![
                "https://upload.wikimedia.org/a.jpg",
                "https://en.wikipedia.org/static/b.png",
                "https://upload.wikimedia.org/c.jpg",
            ]
        );
    }

    #[test]
    fn test_data_src_preferred_and_entities_decoded() {
        let found = urls(
            r#"<img src="placeholder.gif" data-src="https://img.example/x.png?w=1&amp;h=2">"#,
        );
        assert_eq!(found, vec!["https://img.example/x.png?w=1&h=2"]);
    }

    #[test]
    fn test_duplicates_and_inline_data_skipped() {
        let found = urls(
            r#"<img src="https://img.example/x.png">
               <img src="data:image/png;base64,AAAA">
               <img src="https://img.example/x.png">
               <img alt="no source">"#,
        );
        assert_eq!(found, vec!["https://img.example/x.png"]);
    }

    #[test]
    fn test_multiline_tag() {
        let found = urls("<img\n  alt=\"crab\"\n  src=\"https://img.example/crab.png\"\n/>");
        assert_eq!(found, vec!["https://img.example/crab.png"]);
    }

    #[test]
    fn test_images_belong_to_article() {
        let article = ArticleContent::new(
            "https://example.com/post",
            r#"<img src="https://img.example/1.png">"#,
        );
        let images = ImageExtractor::new().images(&article);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].parent, "https://example.com/post");
    }
}
