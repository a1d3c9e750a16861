//! Request normalization for matching

use std::fmt;

use crate::recording::Headers;

/// URI reduced to the parts that take part in matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUri {
    /// Lower-cased scheme, empty for relative URIs
    pub scheme: String,
    /// Lower-cased host (and non-default port)
    pub authority: String,
    /// Path, always with a leading slash
    pub path: String,
    /// Decoded query parameters, sorted by name
    pub query: Vec<(String, String)>,
}

impl fmt::Display for NormalizedUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}://", self.scheme)?;
        }
        write!(f, "{}{}", self.authority, self.path)?;
        for (i, (key, value)) in self.query.iter().enumerate() {
            let separator = if i == 0 { '?' } else { '&' };
            write!(
                f,
                "{separator}{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )?;
        }
        Ok(())
    }
}

/// Normalize a URI.
///
/// Scheme and host are lower-cased, default ports dropped, the fragment
/// removed, query parameters decoded, `ignored_query` names (case-insensitive)
/// removed and the rest sorted by name. The path is compared verbatim.
#[must_use]
pub fn normalize_uri(uri: &str, ignored_query: &[String]) -> NormalizedUri {
    let uri = uri.trim();
    let uri = uri.split_once('#').map_or(uri, |(before, _)| before);

    let (scheme, rest) = match uri.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => (String::new(), uri),
    };

    let (authority, path_and_query) = if scheme.is_empty() {
        ("", rest)
    } else {
        let end = rest.find(['/', '?']).unwrap_or(rest.len());
        rest.split_at(end)
    };

    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, query),
        None => (path_and_query, ""),
    };

    let mut params: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .filter(|(key, _)| !ignored_query.iter().any(|i| i.eq_ignore_ascii_case(key)))
        .collect();
    // Stable, so repeated keys keep their relative order.
    params.sort_by(|a, b| a.0.cmp(&b.0));

    NormalizedUri {
        authority: strip_default_port(&scheme, &authority.to_ascii_lowercase()),
        scheme,
        path: normalize_path(path),
        query: params,
    }
}

/// Lower-cased, trimmed headers sorted by name, minus the ignored ones
#[must_use]
pub fn canonical_headers(headers: &Headers, ignored: &[String]) -> Vec<(String, Vec<String>)> {
    let mut canonical: Vec<(String, Vec<String>)> = headers
        .iter()
        .filter(|(name, _)| !ignored.iter().any(|i| i.eq_ignore_ascii_case(name)))
        .map(|(name, values)| {
            (
                name.to_ascii_lowercase(),
                values.iter().map(|v| v.trim().to_string()).collect(),
            )
        })
        .collect();
    canonical.sort_by(|a, b| a.0.cmp(&b.0));
    canonical
}

/// Exact byte equality, or structural equality when both sides are JSON.
///
/// Object key order is irrelevant for JSON; array order is not.
#[must_use]
pub fn bodies_equal(left: Option<&[u8]>, right: Option<&[u8]>) -> bool {
    let left = left.unwrap_or_default();
    let right = right.unwrap_or_default();

    if left == right {
        return true;
    }

    match (
        serde_json::from_slice::<serde_json::Value>(left),
        serde_json::from_slice::<serde_json::Value>(right),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn decode(component: &str) -> String {
    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), |decoded| decoded.into_owned())
}

fn strip_default_port(scheme: &str, authority: &str) -> String {
    let default = match scheme {
        "http" => ":80",
        "https" => ":443",
        _ => return authority.to_string(),
    };
    authority
        .strip_suffix(default)
        .unwrap_or(authority)
        .to_string()
}

/// Normalize a URL path
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();

    if trimmed.is_empty() || !trimmed.starts_with('/') {
        format!("/{trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_and_host_lowercased() {
        let a = normalize_uri("HTTPS://Example.COM/Api/Items", &[]);
        let b = normalize_uri("https://example.com/Api/Items", &[]);

        assert_eq!(a, b);
        assert_eq!(a.path, "/Api/Items");
    }

    #[test]
    fn test_path_is_case_sensitive() {
        assert_ne!(
            normalize_uri("http://h/items", &[]),
            normalize_uri("http://h/Items", &[])
        );
    }

    #[test]
    fn test_query_order_independence() {
        assert_eq!(
            normalize_uri("http://h/p?b=2&a=1", &[]),
            normalize_uri("http://h/p?a=1&b=2", &[])
        );
    }

    #[test]
    fn test_ignored_query_parameters() {
        let ignored = vec!["timestamp".to_string()];
        assert_eq!(
            normalize_uri("http://h/p?a=1&Timestamp=123", &ignored),
            normalize_uri("http://h/p?timestamp=999&a=1", &ignored)
        );
    }

    #[test]
    fn test_query_decoding() {
        let uri = normalize_uri("http://h/p?q=hello%20world&r=a+b", &[]);
        assert_eq!(
            uri.query,
            vec![
                ("q".to_string(), "hello world".to_string()),
                ("r".to_string(), "a b".to_string())
            ]
        );
    }

    #[test]
    fn test_default_port_and_fragment() {
        assert_eq!(
            normalize_uri("http://h:80/p#section", &[]),
            normalize_uri("http://h/p", &[])
        );
        assert_ne!(
            normalize_uri("http://h:8080/p", &[]),
            normalize_uri("http://h/p", &[])
        );
    }

    #[test]
    fn test_empty_path() {
        assert_eq!(normalize_uri("http://h", &[]).path, "/");
        assert_eq!(normalize_uri("http://h?x=1", &[]).path, "/");
    }

    #[test]
    fn test_display() {
        let uri = normalize_uri("HTTP://H/p?b=2&a=x y", &[]);
        assert_eq!(uri.to_string(), "http://h/p?a=x%20y&b=2");
    }

    #[test]
    fn test_canonical_headers() {
        let headers: Headers = [("X-B", " 2 "), ("x-a", "1"), ("Date", "now")]
            .into_iter()
            .collect();

        let canonical = canonical_headers(&headers, &["date".to_string()]);
        assert_eq!(
            canonical,
            vec![
                ("x-a".to_string(), vec!["1".to_string()]),
                ("x-b".to_string(), vec!["2".to_string()])
            ]
        );
    }

    fn bytes(text: &str) -> Option<&[u8]> {
        Some(text.as_bytes())
    }

    #[test]
    fn test_bodies_equal_json_key_order() {
        assert!(bodies_equal(
            bytes(r#"{"a":1,"b":[1,2]}"#),
            bytes(r#"{ "b": [1, 2], "a": 1 }"#)
        ));
        assert!(!bodies_equal(bytes(r#"{"b":[2,1]}"#), bytes(r#"{"b":[1,2]}"#)));
        assert!(!bodies_equal(bytes("abc"), bytes("abd")));
        assert!(bodies_equal(None, bytes("")));
    }
}
