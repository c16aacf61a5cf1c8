//! Request path resolution against the working directory and content root
//!
//! Lookup order (first hit wins):
//! 1. `<working_dir>/<path>` as a file
//! 2. `<working_dir>/<path>/<default_file>` as a file
//! 3. `<content_root>/<path>` as a file
//! 4. `<content_root>/<path>/<default_file>` as a file
//! 5. `<working_dir>/<path>` as a directory
//! 6. `<content_root>/<path>` as a directory
//!
//! Every candidate is canonicalized and must stay under its root, so neither
//! `..` segments nor symlinks can reach outside the served trees. Files
//! registered with [`Resolver::hide`] never resolve.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Outcome of a successful resolution. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub kind: EntryKind,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl Resolved {
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    working_dir: PathBuf,
    content_root: Option<PathBuf>,
    default_file: String,
    hidden: Vec<PathBuf>,
}

impl Resolver {
    /// Create a resolver rooted at `working_dir`
    ///
    /// The content root is `working_dir/default_folder`; when it does not
    /// exist the lookups that use it are skipped.
    pub fn new(
        working_dir: impl AsRef<Path>,
        default_folder: &str,
        default_file: impl Into<String>,
    ) -> std::io::Result<Self> {
        let working_dir = working_dir.as_ref().canonicalize()?;
        let content_root = working_dir.join(default_folder).canonicalize().ok();
        if content_root.is_none() {
            debug!(
                working_dir = %working_dir.display(),
                default_folder,
                "Content root does not exist, only the working directory is served"
            );
        }

        Ok(Self {
            working_dir,
            content_root,
            default_file: default_file.into(),
            hidden: Vec::new(),
        })
    }

    /// Refuse to serve these files; relative paths are taken from the
    /// working directory and paths that do not exist are ignored
    #[must_use]
    pub fn hide<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            if let Ok(canonical) = self.working_dir.join(path.as_ref()).canonicalize() {
                self.hidden.push(canonical);
            }
        }
        self
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    #[must_use]
    pub fn content_root(&self) -> Option<&Path> {
        self.content_root.as_deref()
    }

    /// Resolve a decoded request path, `None` when nothing matches
    pub async fn resolve(&self, request_path: &str) -> Option<Resolved> {
        let hit = self.lookup(request_path).await?;
        if self.hidden.contains(&hit.path) {
            debug!(request_path, "Refusing to serve a hidden file");
            return None;
        }
        Some(hit)
    }

    async fn lookup(&self, request_path: &str) -> Option<Resolved> {
        let Some(relative) = sanitize(request_path) else {
            debug!(request_path, "Rejected path escaping the served roots");
            return None;
        };

        let wd = self.working_dir.as_path();
        let root = self.content_root.as_deref();

        if let Some(hit) = check_entry(wd, &wd.join(&relative), EntryKind::File).await {
            return Some(hit);
        }
        let index = wd.join(&relative).join(&self.default_file);
        if let Some(hit) = check_entry(wd, &index, EntryKind::File).await {
            return Some(hit);
        }
        if let Some(root) = root {
            if let Some(hit) = check_entry(root, &root.join(&relative), EntryKind::File).await {
                return Some(hit);
            }
            let index = root.join(&relative).join(&self.default_file);
            if let Some(hit) = check_entry(root, &index, EntryKind::File).await {
                return Some(hit);
            }
        }
        if let Some(hit) = check_entry(wd, &wd.join(&relative), EntryKind::Directory).await {
            return Some(hit);
        }
        if let Some(root) = root {
            return check_entry(root, &root.join(&relative), EntryKind::Directory).await;
        }

        None
    }
}

/// Lexically normalize a request path into a relative path
///
/// Returns `None` when a `..` would climb above the root or a segment
/// carries characters that are never valid in a served name.
fn sanitize(request_path: &str) -> Option<PathBuf> {
    let mut segments: Vec<&str> = Vec::new();

    for segment in request_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s if s.contains(['\0', '\\']) => return None,
            s => {
                // A segment like "C:" would make the join absolute on Windows
                let mut components = Path::new(s).components();
                if !matches!(
                    (components.next(), components.next()),
                    (Some(Component::Normal(_)), None)
                ) {
                    return None;
                }
                segments.push(s);
            }
        }
    }

    Some(segments.iter().collect())
}

async fn check_entry(root: &Path, candidate: &Path, kind: EntryKind) -> Option<Resolved> {
    let canonical = fs::canonicalize(candidate).await.ok()?;
    if !canonical.starts_with(root) {
        debug!(
            candidate = %candidate.display(),
            root = %root.display(),
            "Candidate escapes its root, skipping"
        );
        return None;
    }

    let metadata = fs::metadata(&canonical).await.ok()?;
    let matches = match kind {
        EntryKind::File => metadata.is_file(),
        EntryKind::Directory => metadata.is_dir(),
    };

    matches.then(|| Resolved {
        kind,
        path: canonical,
        size: metadata.len(),
        modified: metadata.modified().ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::TempDir;

    /// working dir with `client/` content root
    fn fixture() -> (TempDir, Resolver) {
        let dir = tempfile::tempdir().unwrap();
        stdfs::create_dir_all(dir.path().join("client/videos")).unwrap();
        stdfs::write(dir.path().join("client/index.html"), "<html></html>").unwrap();
        stdfs::write(dir.path().join("client/videos/a.mp4"), vec![7u8; 1000]).unwrap();
        stdfs::write(dir.path().join("config.json"), "{}").unwrap();
        let resolver = Resolver::new(dir.path(), "client", "index.html").unwrap();
        (dir, resolver)
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("/"), Some(PathBuf::new()));
        assert_eq!(sanitize("/videos/a.mp4"), Some(PathBuf::from("videos/a.mp4")));
        assert_eq!(sanitize("/videos/./x/../a.mp4"), Some(PathBuf::from("videos/a.mp4")));
        assert_eq!(sanitize("//double//slash/"), Some(PathBuf::from("double/slash")));
        assert_eq!(sanitize("/../etc/passwd"), None);
        assert_eq!(sanitize("/videos/../../etc/passwd"), None);
        assert_eq!(sanitize("/a\\..\\b"), None);
    }

    #[tokio::test]
    async fn test_literal_file_wins() {
        let (dir, resolver) = fixture();

        let hit = resolver.resolve("/config.json").await.unwrap();
        assert_eq!(hit.kind, EntryKind::File);
        assert_eq!(hit.path, dir.path().canonicalize().unwrap().join("config.json"));
        assert_eq!(hit.size, 2);
        assert!(hit.modified.is_some());
    }

    #[tokio::test]
    async fn test_content_root_fallback() {
        let (dir, resolver) = fixture();

        let hit = resolver.resolve("/videos/a.mp4").await.unwrap();
        assert_eq!(
            hit.path,
            dir.path().canonicalize().unwrap().join("client/videos/a.mp4")
        );
        assert_eq!(hit.size, 1000);
    }

    #[tokio::test]
    async fn test_root_serves_content_root_index() {
        let (dir, resolver) = fixture();

        let hit = resolver.resolve("/").await.unwrap();
        assert_eq!(hit.kind, EntryKind::File);
        assert_eq!(
            hit.path,
            dir.path().canonicalize().unwrap().join("client/index.html")
        );
    }

    #[tokio::test]
    async fn test_working_dir_index_beats_content_root() {
        let (dir, resolver) = fixture();
        stdfs::write(dir.path().join("index.html"), "top").unwrap();

        let hit = resolver.resolve("/").await.unwrap();
        assert_eq!(hit.path, dir.path().canonicalize().unwrap().join("index.html"));
    }

    #[tokio::test]
    async fn test_directory_resolution() {
        let (dir, resolver) = fixture();

        let hit = resolver.resolve("/videos").await.unwrap();
        assert!(hit.is_directory());
        assert_eq!(hit.path, dir.path().canonicalize().unwrap().join("client/videos"));

        // the working directory itself is a directory once no index exists in it
        stdfs::remove_file(dir.path().join("client/index.html")).unwrap();
        let hit = resolver.resolve("/").await.unwrap();
        assert!(hit.is_directory());
        assert_eq!(hit.path, dir.path().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_missing_path() {
        let (_dir, resolver) = fixture();
        assert!(resolver.resolve("/videos/missing.mp4").await.is_none());
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let outer = tempfile::tempdir().unwrap();
        stdfs::write(outer.path().join("secret.txt"), "secret").unwrap();
        let served = outer.path().join("served");
        stdfs::create_dir_all(served.join("client")).unwrap();
        let resolver = Resolver::new(&served, "client", "index.html").unwrap();

        assert!(resolver.resolve("/../secret.txt").await.is_none());
        assert!(resolver.resolve("/client/../../secret.txt").await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_rejected() {
        let outer = tempfile::tempdir().unwrap();
        stdfs::write(outer.path().join("secret.txt"), "secret").unwrap();
        let served = outer.path().join("served");
        stdfs::create_dir_all(&served).unwrap();
        std::os::unix::fs::symlink(outer.path().join("secret.txt"), served.join("link.txt"))
            .unwrap();
        let resolver = Resolver::new(&served, "client", "index.html").unwrap();

        assert!(resolver.content_root().is_none());
        assert!(resolver.resolve("/link.txt").await.is_none());
    }

    #[tokio::test]
    async fn test_hidden_files_never_resolve() {
        let (dir, resolver) = fixture();
        stdfs::create_dir_all(dir.path().join("server")).unwrap();
        stdfs::write(dir.path().join("server/https.key"), "key").unwrap();
        stdfs::write(dir.path().join("server/readme.txt"), "hi").unwrap();
        let resolver = resolver.hide(["server/https.key", "server/missing.crt"]);

        assert!(resolver.resolve("/server/https.key").await.is_none());
        assert!(resolver.resolve("/server/./https.key").await.is_none());
        assert!(resolver.resolve("/server/readme.txt").await.is_some());
    }
}
