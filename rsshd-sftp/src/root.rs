//! Confinement of the peer's paths to a root directory.
//!
//! Paths are first normalized lexically as absolute paths from the root, where `..`
//! never climbs above `/`. The result is then canonicalized on the file-system,
//! and refused with [`Error::PathEscape`] if a symbolic link led it outside of the root.

use std::{
    ffi::OsString,
    io,
    path::{Component, Path, PathBuf},
};

use crate::{Error, Result};

/// A root directory in which all the paths of a peer are resolved.
#[derive(Debug, Clone)]
pub struct Root {
    path: PathBuf,
}

impl Root {
    /// Create a root at `path`, which must be an existing directory.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = tokio::fs::canonicalize(path).await?;

        if !tokio::fs::metadata(&path).await?.is_dir() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "the root is not a directory").into());
        }

        Ok(Self { path })
    }

    /// The canonical location of the root on the file-system.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalize `path` lexically as an absolute path from the root,
    /// relative paths being relative to the root itself.
    pub fn normalize(path: &str) -> String {
        let mut segments = Vec::new();

        for segment in path.split('/') {
            match segment {
                "" | "." => (),
                ".." => {
                    segments.pop();
                }
                segment => segments.push(segment),
            }
        }

        format!("/{}", segments.join("/"))
    }

    fn join(&self, normalized: &str) -> PathBuf {
        self.path.join(normalized.trim_start_matches('/'))
    }

    fn contain(&self, real: PathBuf, path: &str) -> Result<PathBuf> {
        if real.starts_with(&self.path) {
            Ok(real)
        } else {
            tracing::warn!("Refused the path `{path}`, resolving outside of the root");

            Err(Error::PathEscape(path.into()))
        }
    }

    /// Resolve `path` to a location on the file-system, following symbolic links.
    ///
    /// The trailing components of the path may not exist yet, to allow the creation of files.
    pub async fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut existing = self.join(&Self::normalize(path));
        let mut missing: Vec<OsString> = Vec::new();

        loop {
            match tokio::fs::canonicalize(&existing).await {
                Ok(canonical) => {
                    let real = missing
                        .into_iter()
                        .rev()
                        .fold(canonical, |real, name| real.join(name));

                    break self.contain(real, path);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    // A dangling symbolic link, which could be followed upon creation.
                    if tokio::fs::symlink_metadata(&existing).await.is_ok() {
                        break Err(Error::PathEscape(path.into()));
                    }

                    match (existing.parent(), existing.file_name()) {
                        (Some(parent), Some(name)) => {
                            missing.push(name.to_owned());
                            existing = parent.to_path_buf();
                        }
                        _ => break Err(err.into()),
                    }
                }
                Err(err) => break Err(err.into()),
            }
        }
    }

    /// Resolve `path` to a location on the file-system, following symbolic links
    /// in all but the last component, for operations acting on the links themselves.
    pub async fn resolve_link(&self, path: &str) -> Result<PathBuf> {
        let normalized = Self::normalize(path);

        match normalized.rsplit_once('/') {
            Some((parent, name)) if !name.is_empty() => {
                let parent = self.resolve(parent).await?;

                Ok(parent.join(name))
            }
            _ => Ok(self.path.clone()),
        }
    }

    /// Resolve `path` like [`Root::resolve_link`] for operations that remove, move or create
    /// the entry itself, which the root directory can never be the target of.
    pub async fn resolve_entry(&self, path: &str) -> Result<PathBuf> {
        let real = self.resolve_link(path).await?;

        if real == self.path {
            tracing::warn!("Refused to alter the root directory through `{path}`");

            return Err(io::Error::from(io::ErrorKind::PermissionDenied).into());
        }

        Ok(real)
    }

    /// The path as seen from the peer of a `real` location inside the root.
    pub fn to_virtual(&self, real: &Path) -> Result<String> {
        let relative = real
            .strip_prefix(&self.path)
            .map_err(|_| Error::PathEscape(real.to_string_lossy().into_owned()))?;

        let segments = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(name) => Some(name.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>();

        Ok(format!("/{}", segments.join("/")))
    }

    /// The canonical form of `path` as seen from the peer.
    pub async fn realpath(&self, path: &str) -> Result<String> {
        self.to_virtual(&self.resolve(path).await?)
    }

    /// Translate the `target` of a symbolic link created at `link`
    /// into an absolute location inside the root.
    pub fn link_target(&self, link: &str, target: &str) -> PathBuf {
        if target.starts_with('/') {
            self.join(&Self::normalize(target))
        } else {
            let link = Self::normalize(link);
            let parent = link.rsplit_once('/').map(|(parent, _)| parent).unwrap_or_default();

            self.join(&Self::normalize(&format!("{parent}/{target}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_never_climbs_above_the_root() {
        assert_eq!(Root::normalize("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(Root::normalize("a/./b/../c/"), "/a/c");
        assert_eq!(Root::normalize(""), "/");
        assert_eq!(Root::normalize("."), "/");
        assert_eq!(Root::normalize("//x//y"), "/x/y");
    }

    #[tokio::test]
    async fn dotted_paths_stay_inside() {
        let dir = tempfile::tempdir().unwrap();
        let root = Root::new(dir.path()).await.unwrap();

        let resolved = root.resolve("/../../etc/passwd").await.unwrap();
        assert_eq!(resolved, root.path().join("etc/passwd"));
    }

    #[tokio::test]
    async fn a_root_at_the_top_resolves_everywhere() {
        let root = Root::new("/").await.unwrap();

        assert_eq!(
            root.resolve("/../../etc/passwd").await.unwrap(),
            Path::new("/etc/passwd")
        );
    }

    #[tokio::test]
    async fn symbolic_links_out_of_the_root_are_refused() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let root = Root::new(dir.path()).await.unwrap();

        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("void"), dir.path().join("dangling")).unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        std::os::unix::fs::symlink("../inner", dir.path().join("inner/self")).unwrap();

        assert!(matches!(
            root.resolve("/escape/file").await,
            Err(Error::PathEscape(_))
        ));
        assert!(matches!(
            root.resolve("/dangling").await,
            Err(Error::PathEscape(_))
        ));
        assert_eq!(
            root.resolve("/inner/self").await.unwrap(),
            root.path().join("inner")
        );

        // The link itself is inside and may be operated on.
        assert_eq!(
            root.resolve_link("/escape").await.unwrap(),
            root.path().join("escape")
        );
    }

    #[tokio::test]
    async fn realpath_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = Root::new(dir.path()).await.unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();

        let once = root.realpath("a/../a/./b/../../..").await.unwrap();
        let twice = root.realpath(&once).await.unwrap();
        assert_eq!(once, "/");
        assert_eq!(once, twice);

        let once = root.realpath("/a/new").await.unwrap();
        assert_eq!(once, "/a/new");
        assert_eq!(root.realpath(&once).await.unwrap(), once);
    }

    #[tokio::test]
    async fn the_root_is_not_an_entry() {
        let dir = tempfile::tempdir().unwrap();
        let root = Root::new(dir.path()).await.unwrap();

        for path in ["/", "", ".", "/..", "a/.."] {
            assert!(matches!(
                root.resolve_entry(path).await,
                Err(Error::Io(err)) if err.kind() == io::ErrorKind::PermissionDenied
            ));
        }
        assert_eq!(root.resolve_entry("/a").await.unwrap(), root.path().join("a"));
    }

    #[test]
    fn link_targets_are_mapped_inside() {
        let root = Root {
            path: PathBuf::from("/srv/root"),
        };

        assert_eq!(
            root.link_target("/dir/link", "/etc/passwd"),
            Path::new("/srv/root/etc/passwd")
        );
        assert_eq!(
            root.link_target("/dir/link", "../../../target"),
            Path::new("/srv/root/target")
        );
        assert_eq!(
            root.link_target("/dir/link", "sibling"),
            Path::new("/srv/root/dir/sibling")
        );
    }
}
