//! RFC 5988 `Link` header handling for GitHub pagination.

use url::Url;

/// Position in the audit log. GitHub hands out opaque `after` cursors; older
/// endpoints still paginate by page number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditCursor {
    After(String),
    Page(u32),
}

impl AuditCursor {
    /// Cursor for the page a `rel="next"` url points at. `after` wins over `page`.
    pub fn from_next_url(next_url: &str) -> Option<Self> {
        let url = Url::parse(next_url).ok()?;
        let mut page = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "after" if !value.is_empty() => return Some(AuditCursor::After(value.into_owned())),
                "page" => page = value.parse().ok(),
                _ => {}
            }
        }
        page.map(AuditCursor::Page)
    }

    /// Query parameter name and value to send.
    pub fn query_pair(&self) -> (&'static str, String) {
        match self {
            AuditCursor::After(cursor) => ("after", cursor.clone()),
            AuditCursor::Page(page) => ("page", page.to_string()),
        }
    }
}

/// Extract the `rel="next"` target from a Link header.
pub fn next_link(link_header: &str) -> Option<String> {
    // <https://api.github.com/resource?page=2>; rel="next", <...>; rel="last"
    for link in link_header.split(',') {
        let mut parts = link.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if is_next {
            let start = target.find('<')?;
            let end = target.find('>')?;
            return Some(target[start + 1..end].to_string());
        }
    }
    None
}

/// Cursor for the following page, or `None` when pagination is over.
pub fn next_cursor(link_header: Option<&str>) -> Option<AuditCursor> {
    link_header
        .and_then(next_link)
        .and_then(|url| AuditCursor::from_next_url(&url))
}
