//! String-level path and URL helpers shared by the registry and the ingest
//! pipeline.

/// Lexically normalize a path.
///
/// Drops `.` components and empty segments, folds `..` into the preceding
/// component and joins everything with `/`, so that `a\b/./c/../d` and
/// `a/b/d` compare equal. Leading `..` components of a relative path are kept.
/// An empty path normalizes to `.`.
pub fn normalize(path: &str) -> String {
  let absolute = path.starts_with('/') || path.starts_with('\\');
  let mut parts: Vec<&str> = Vec::new();

  for part in path.split(['/', '\\']) {
    match part {
      "" | "." => {}
      ".." => {
        if parts.last().is_some_and(|p| *p != "..") {
          parts.pop();
        } else if !absolute {
          parts.push("..");
        }
      }
      other => parts.push(other),
    }
  }

  let joined = parts.join("/");
  if absolute {
    format!("/{}", joined)
  } else if joined.is_empty() {
    ".".to_string()
  } else {
    joined
  }
}

/// Strip the query string and fragment from a URL.
///
/// Tokens passed as query parameters never survive this call, which makes the
/// result safe to persist and to log.
pub fn clean_url(url: &str) -> &str {
  url.split(['?', '#']).next().unwrap_or(url)
}

/// Last path segment of a URL, ignoring query string and fragment.
pub fn url_file_name(url: &str) -> &str {
  let clean = clean_url(url);
  clean.rsplit('/').next().unwrap_or(clean)
}

/// First 16 characters of a content hash, for log lines.
pub fn short_hash(hash: &str) -> &str {
  hash.get(..16).unwrap_or(hash)
}
