//! Turns a `Location` header value into an absolute target URL.

use url::Url;

/// Resolves `location` against the URL of the request that received it.
///
/// An absolute `http`/`https` URL is used as is. Anything else inherits the
/// scheme, host and port of `base`: a network-path reference (`//host/path`)
/// only takes the scheme, while a path is made absolute by prefixing `/`
/// when needed, and an empty path keeps the base path. Query and fragment
/// are carried over from `location`.
///
/// Returns `None` when no valid `http`/`https` URL can be built.
pub fn resolve_redirect(base: &Url, location: &str) -> Option<Url> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }

    let resolved = match Url::parse(location) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => resolve_relative(base, location)?,
        Err(_) => return None,
    };

    let supported = matches!(resolved.scheme(), "http" | "https") && resolved.host_str().is_some_and(|h| !h.is_empty());
    supported.then_some(resolved)
}

fn resolve_relative(base: &Url, location: &str) -> Option<Url> {
    if location.starts_with("//") {
        return Url::parse(&format!("{}:{location}", base.scheme())).ok();
    }

    let (rest, fragment) = match location.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (location, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };

    let mut target = format!("{}://{}", base.scheme(), base.host_str()?);
    if let Some(port) = base.port() {
        target.push_str(&format!(":{port}"));
    }
    match path {
        "" => target.push_str(base.path()),
        path if path.starts_with('/') => target.push_str(path),
        path => {
            target.push('/');
            target.push_str(path);
        }
    }
    if let Some(query) = query {
        target.push('?');
        target.push_str(query);
    }
    if let Some(fragment) = fragment {
        target.push('#');
        target.push_str(fragment);
    }

    Url::parse(&target).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(location: &str) -> Option<String> {
        let base = Url::parse("http://example.com:8080/dir/page?old=1#top").unwrap();
        resolve_redirect(&base, location).map(String::from)
    }

    #[test]
    fn absolute_urls_are_used_directly() {
        assert_eq!(resolve("https://other.example.org/x?y=1").as_deref(), Some("https://other.example.org/x?y=1"));
        assert_eq!(resolve("  http://example.com/spaced  ").as_deref(), Some("http://example.com/spaced"));
    }

    #[test]
    fn absolute_paths_inherit_scheme_host_and_port() {
        assert_eq!(resolve("/login?next=%2F#form").as_deref(), Some("http://example.com:8080/login?next=%2F#form"));
    }

    #[test]
    fn relative_paths_become_absolute() {
        assert_eq!(resolve("next").as_deref(), Some("http://example.com:8080/next"));
        assert_eq!(resolve("a/b?c=d").as_deref(), Some("http://example.com:8080/a/b?c=d"));
    }

    #[test]
    fn query_only_keeps_the_base_path() {
        assert_eq!(resolve("?page=2").as_deref(), Some("http://example.com:8080/dir/page?page=2"));
    }

    #[test]
    fn network_path_inherits_scheme_only() {
        assert_eq!(resolve("//cdn.example.net/asset").as_deref(), Some("http://cdn.example.net/asset"));
    }

    #[test]
    fn unusable_locations_fail() {
        assert_eq!(resolve(""), None);
        assert_eq!(resolve("ftp://example.com/file"), None);
        assert_eq!(resolve("mailto:someone@example.com"), None);
        assert_eq!(resolve("http://exa mple.com/"), None);
        assert_eq!(resolve("http://[::1/"), None);
    }
}
