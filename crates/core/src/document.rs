//! Document identity.

use std::sync::LazyLock;

use regex::Regex;

static PRESENTATION_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/presentation/d/([A-Za-z0-9_-]+)").expect("valid regex")
});

static BARE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

/// Presentation id from a `/presentation/d/<id>/...` URL.
pub fn extract_document_id(url: &str) -> Option<String> {
    PRESENTATION_URL_RE
        .captures(url)
        .map(|caps| caps[1].to_string())
}

/// Accept either a presentation URL or a bare document id.
pub fn resolve_document_id(input: &str) -> Option<String> {
    let input = input.trim();
    extract_document_id(input).or_else(|| BARE_ID_RE.is_match(input).then(|| input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_edit_url() {
        let url = "https://docs.google.com/presentation/d/1AbC-d_9xYz/edit#slide=id.p3";
        assert_eq!(extract_document_id(url).as_deref(), Some("1AbC-d_9xYz"));
    }

    #[test]
    fn non_presentation_url_has_no_id() {
        assert_eq!(extract_document_id("https://docs.google.com/document/d/abc/edit"), None);
        assert_eq!(extract_document_id("/presentation/d/"), None);
    }

    #[test]
    fn resolve_accepts_bare_ids_only() {
        assert_eq!(resolve_document_id(" deck-42 ").as_deref(), Some("deck-42"));
        assert_eq!(
            resolve_document_id("https://x/presentation/d/id_1/view").as_deref(),
            Some("id_1")
        );
        assert_eq!(resolve_document_id("not an id"), None);
        assert_eq!(resolve_document_id(""), None);
    }
}
