//! Cursor extraction from `Link` response headers.
//!
//! The products endpoint returns
//! `<https://{shop}/admin/api/{v}/products.json?limit=250&page_info=abc>; rel="next"`
//! (optionally alongside a `rel="previous"` entry). Only the `page_info` value
//! is kept; the next request is rebuilt from the configured base URL.

/// Returns the `page_info` cursor of the `rel="next"` link, if any.
pub fn extract_next_cursor(link_header: Option<&str>) -> Option<String> {
    let header = link_header?;

    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|param| {
            let param = param.trim();
            param == r#"rel="next""# || param == "rel=next"
        });
        if !is_next {
            return None;
        }

        let url = target.strip_prefix('<')?.strip_suffix('>')?;
        let (_, query) = url.split_once('?')?;
        query.split('&').find_map(|pair| {
            let value = pair.strip_prefix("page_info=")?;
            urlencoding::decode(value)
                .ok()
                .map(|v| v.into_owned())
                .filter(|v| !v.is_empty())
        })
    })
}
