/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// Pattern to match ssh, git, http[s] and ftp[s] URLs:
///                  <proto>      [user@]  <host>  [:port]   <path>
static RE_URL_WITH_PROTO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z]+)://([^@]+@)?([^:/]+)(:[0-9]+)?/(.*)$").unwrap());

/// Pattern to match the scp-like syntax `[user@]host:path`. The host must
/// have at least two characters to distinguish it from Windows drives.
static RE_URL_SCP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^@]+@)?([^:/\\]{2,}):(.*)$").unwrap());

static RE_URL_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^file://(.*)$").unwrap());

const SUPPORTED_PROTOCOLS: &[&str] = &["http", "https", "ftp", "ftps", "ssh", "git"];

/// Normalize a repository URL.
///
/// The user info is kept, the path is normalized without escaping above
/// the host root and trailing `/` and `.git` are removed. URLs that do not
/// designate a remote repository are returned unchanged.
pub fn normalize_url(url: &str) -> String {
    if RE_URL_FILE.is_match(url) {
        return url.to_string();
    }

    if let Some(captures) = RE_URL_WITH_PROTO.captures(url) {
        let proto = &captures[1];
        if !is_supported_protocol(proto) {
            return url.to_string();
        }
        let user = captures.get(2).map_or("", |m| m.as_str());
        let host = &captures[3];
        let port = captures.get(4).map_or("", |m| m.as_str());
        let path = normalize_repo_path(&captures[5]);
        return format!("{proto}://{user}{host}{port}/{path}");
    }

    if let Some(captures) = RE_URL_SCP.captures(url) {
        let user = captures.get(1).map_or("", |m| m.as_str());
        let host = &captures[2];
        let path = normalize_repo_path(&captures[3]);
        return format!("{user}{host}:{path}");
    }

    url.to_string()
}

/// Convert a URL into the mirror path under the cache directory.
///
/// Remote URLs map to `<cache>/mirrors/<host>[_<port>]/<path>`. Local
/// paths and `file://` URLs are not mirrored; they only resolve to a
/// mirror path when they already point below the cache directory.
pub fn mirror_path(url: &str, cache_dir: &Path) -> Option<PathBuf> {
    if let Some(captures) = RE_URL_FILE.captures(url) {
        return local_mirror_path(&captures[1], cache_dir);
    }

    let sub_dir = if let Some(captures) = RE_URL_WITH_PROTO.captures(url) {
        if !is_supported_protocol(&captures[1]) {
            return local_mirror_path(url, cache_dir);
        }
        let host = &captures[3];
        let port = captures.get(4).map_or(String::new(), |m| m.as_str().replace(':', "_"));
        format!("{host}{port}/{}", normalize_repo_path(&captures[5]))
    } else if let Some(captures) = RE_URL_SCP.captures(url) {
        format!("{}/{}", &captures[2], normalize_repo_path(&captures[3]))
    } else {
        return local_mirror_path(url, cache_dir);
    };

    let mut sub_dir = sub_dir.replace("//", "/");
    sub_dir = sub_dir.trim_matches('/').to_string();
    if let Some(stripped) = sub_dir.strip_suffix(".git") {
        sub_dir = stripped.to_string();
    }

    let mut path = cache_dir.join("mirrors");
    for part in sub_dir.split('/') {
        path.push(part);
    }
    Some(path)
}

/// Resolve a relative submodule URL against the URL of the parent
/// repository using git's rule: `../` walks up, never past the protocol
/// separator and never past a scp-like `:` separator; `./` keeps the
/// parent.
pub fn resolve_submodule_url(parent_url: &str, submodule_url: &str) -> String {
    if !submodule_url.starts_with("./") && !submodule_url.starts_with("../") {
        return submodule_url.to_string();
    }

    let parent = parent_url.trim_end_matches('/');
    let (head, scp_join, mut segments) = decompose(parent);

    for segment in submodule_url.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other.to_string()),
        }
    }

    let mut resolved = head;
    resolved.push_str(if scp_join { ":" } else { "/" });
    resolved.push_str(&segments.join("/"));
    if submodule_url.ends_with('/') {
        resolved.push('/');
    }
    resolved
}

/// Split a parent URL into the fixed head, the separator style and the
/// path segments the `../` walk operates on.
fn decompose(parent: &str) -> (String, bool, Vec<String>) {
    if let Some(index) = parent.find("://") {
        let rest = &parent[index + 3..];
        return match rest.find('/') {
            Some(slash) => (
                parent[..index + 3 + slash].to_string(),
                false,
                split_segments(&rest[slash + 1..]),
            ),
            None => (parent.to_string(), false, Vec::new()),
        };
    }

    if let Some(colon) = parent.find(':') {
        let host = &parent[..colon];
        if !host.contains('/') && host.len() >= 2 {
            return (host.to_string(), true, split_segments(&parent[colon + 1..]));
        }
    }

    // plain filesystem path; an empty head keeps the leading slash of
    // absolute paths when re-joining
    match parent.strip_prefix('/') {
        Some(rest) => (String::new(), false, split_segments(rest)),
        None => {
            let mut segments = split_segments(parent);
            let head = if segments.is_empty() {
                String::new()
            } else {
                segments.remove(0)
            };
            (head, false, segments)
        }
    }
}

fn split_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_supported_protocol(proto: &str) -> bool {
    SUPPORTED_PROTOCOLS
        .iter()
        .any(|supported| proto.eq_ignore_ascii_case(supported))
}

fn local_mirror_path(path: &str, cache_dir: &Path) -> Option<PathBuf> {
    let normalized = lexical_normalize(Path::new(path));
    normalized.starts_with(cache_dir).then_some(normalized)
}

/// Normalize `.` and `..` components without touching the filesystem.
pub(crate) fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Posix-normalize a repository path, disallow escaping above the host
/// root and strip a trailing `/` and `.git`.
fn normalize_repo_path(path: &str) -> String {
    let mut path = posix_normpath(path);
    while let Some(stripped) = path.strip_prefix("../") {
        path = stripped.to_string();
    }
    while path.ends_with('/') {
        path.pop();
    }
    if let Some(stripped) = path.strip_suffix(".git") {
        path = stripped.to_string();
    }
    path
}

/// Equivalent of Python's `posixpath.normpath`.
fn posix_normpath(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
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
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CACHE: &str = "/cache/.gitcache";

    fn cache() -> &'static Path {
        Path::new(CACHE)
    }

    fn mirror(sub_dir: &str) -> PathBuf {
        let mut path = cache().join("mirrors");
        for part in sub_dir.split('/') {
            path.push(part);
        }
        path
    }

    #[test]
    fn mirror_path_of_proto_urls() {
        for proto in ["http", "https", "ftp", "ftps", "ssh", "git"] {
            for user in ["", "user@"] {
                for (port, port_dir) in [("", ""), (":1234", "_1234")] {
                    let server = format!("{proto}://{user}github.com{port}");
                    let base = format!("github.com{port_dir}");
                    for suffix in ["", "/"] {
                        assert_eq!(
                            mirror_path(&format!("{server}/repo{suffix}"), cache()),
                            Some(mirror(&format!("{base}/repo")))
                        );
                        assert_eq!(
                            mirror_path(&format!("{server}/repo.git{suffix}"), cache()),
                            Some(mirror(&format!("{base}/repo")))
                        );
                        assert_eq!(
                            mirror_path(&format!("{server}/somewhere/../repo.git{suffix}"), cache()),
                            Some(mirror(&format!("{base}/repo")))
                        );
                        assert_eq!(
                            mirror_path(&format!("{server}/.././../repo.git{suffix}"), cache()),
                            Some(mirror(&format!("{base}/repo")))
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn mirror_path_of_scp_urls() {
        for user in ["", "user@"] {
            for suffix in ["", "/"] {
                let server = format!("{user}github.com");
                assert_eq!(
                    mirror_path(&format!("{server}:repo{suffix}"), cache()),
                    Some(mirror("github.com/repo"))
                );
                assert_eq!(
                    mirror_path(&format!("{server}:seeraven/repo.git{suffix}"), cache()),
                    Some(mirror("github.com/seeraven/repo"))
                );
                assert_eq!(
                    mirror_path(&format!("{server}:.././../repo.git{suffix}"), cache()),
                    Some(mirror("github.com/repo"))
                );
            }
        }
    }

    #[test]
    fn mirror_path_of_file_urls() {
        assert_eq!(mirror_path("file:///somewhere/a/file", cache()), None);
        assert_eq!(
            mirror_path(&format!("file://{CACHE}/file"), cache()),
            Some(cache().join("file"))
        );
        assert_eq!(
            mirror_path(&format!("file://{CACHE}/a/../file"), cache()),
            Some(cache().join("file"))
        );
        assert_eq!(mirror_path(&format!("file://{CACHE}/../file"), cache()), None);
    }

    #[test]
    fn mirror_path_of_local_paths() {
        assert_eq!(
            mirror_path(&format!("{CACHE}/config"), cache()),
            Some(cache().join("config"))
        );
        assert_eq!(
            mirror_path(&format!("{CACHE}/a/../config"), cache()),
            Some(cache().join("config"))
        );
        assert_eq!(mirror_path(&format!("{CACHE}/../file"), cache()), None);
        assert_eq!(mirror_path("/somewhere/else", cache()), None);
        assert_eq!(mirror_path("relative/path", cache()), None);
    }

    #[test]
    fn normalize_keeps_user_and_port() {
        assert_eq!(
            normalize_url("https://user@github.com:1234/first/second.git/"),
            "https://user@github.com:1234/first/second"
        );
        assert_eq!(
            normalize_url("git@github.com:seeraven/gitcache.git"),
            "git@github.com:seeraven/gitcache"
        );
        assert_eq!(
            normalize_url("ssh://github.com/a/b/../c//d/"),
            "ssh://github.com/a/c/d"
        );
        assert_eq!(
            normalize_url("file:///somewhere/repo.git"),
            "file:///somewhere/repo.git"
        );
        assert_eq!(normalize_url("/plain/path"), "/plain/path");
    }

    #[test]
    fn normalize_is_idempotent() {
        for url in [
            "https://user@github.com:1234/first/second.git/",
            "git@github.com:seeraven/gitcache.git",
            "ssh://github.com/a/b/../c",
            "file:///somewhere/repo.git",
            "/plain/path",
        ] {
            let normalized = normalize_url(url);
            assert_eq!(normalize_url(&normalized), normalized);
        }
    }

    #[test]
    fn resolve_submodule_urls_with_protocol() {
        for proto in ["http", "https", "ssh", "git"] {
            for user in ["", "user@"] {
                for port in ["", ":1234"] {
                    let server = format!("{proto}://{user}github.com{port}");
                    for repo_suffix in ["", "/"] {
                        let repo = format!("{server}/first/second{repo_suffix}");
                        for sub_suffix in ["", "/"] {
                            let expected = format!("{server}/first/sub{sub_suffix}");
                            assert_eq!(
                                resolve_submodule_url(&repo, &format!("../sub{sub_suffix}")),
                                expected
                            );
                            assert_eq!(
                                resolve_submodule_url(&repo, &format!("./.././sub{sub_suffix}")),
                                expected
                            );
                            assert_eq!(
                                resolve_submodule_url(&repo, &format!("../../first/sub{sub_suffix}")),
                                expected
                            );
                            assert_eq!(
                                resolve_submodule_url(&repo, &format!("./sub{sub_suffix}")),
                                format!("{server}/first/second/sub{sub_suffix}")
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn resolve_submodule_urls_scp_like() {
        for user in ["", "user@"] {
            let server = format!("{user}github.com");
            let repo = format!("{server}:first/second");
            assert_eq!(
                resolve_submodule_url(&repo, "../sub"),
                format!("{server}:first/sub")
            );
            assert_eq!(
                resolve_submodule_url(&repo, "../../first/sub"),
                format!("{server}:first/sub")
            );
            assert_eq!(
                resolve_submodule_url(&repo, "./sub"),
                format!("{server}:first/second/sub")
            );
        }
    }

    #[test]
    fn resolve_submodule_urls_local() {
        for proto in ["", "file://"] {
            let repo = format!("{proto}/root/path/first/second");
            assert_eq!(
                resolve_submodule_url(&repo, "../sub"),
                format!("{proto}/root/path/first/sub")
            );
            assert_eq!(
                resolve_submodule_url(&repo, "./.././sub"),
                format!("{proto}/root/path/first/sub")
            );
            assert_eq!(
                resolve_submodule_url(&repo, "./sub"),
                format!("{proto}/root/path/first/second/sub")
            );
        }
    }

    #[test]
    fn absolute_submodule_urls_are_kept() {
        assert_eq!(
            resolve_submodule_url("https://github.com/first/second", "https://github.com/other"),
            "https://github.com/other"
        );
    }

    #[test]
    fn posix_normpath_behaves_like_python() {
        assert_eq!(posix_normpath("a/b/../c"), "a/c");
        assert_eq!(posix_normpath("a//b/./c/"), "a/b/c");
        assert_eq!(posix_normpath("../../a"), "../../a");
        assert_eq!(posix_normpath("/../a"), "/a");
        assert_eq!(posix_normpath(""), ".");
    }
}
