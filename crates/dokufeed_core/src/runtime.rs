use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const WIKI_ROOT_ENV: &str = "DOKUFEED_WIKI_ROOT";

pub const PATH_SEPARATOR: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub wiki_root: Option<PathBuf>,
}

/// Locations derived from the wiki root. The store keeps page metadata and
/// change logs under `data/meta`, body text under `data/pages`, and the
/// user/ACL configuration under `conf`.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub wiki_root: PathBuf,
    pub meta_dir: PathBuf,
    pub pages_dir: PathBuf,
    pub users_path: PathBuf,
    pub acl_path: PathBuf,
    pub root_source: ValueSource,
}

impl ResolvedPaths {
    pub fn from_root(wiki_root: PathBuf, root_source: ValueSource) -> Self {
        let data_dir = wiki_root.join("data");
        Self {
            meta_dir: data_dir.join("meta"),
            pages_dir: data_dir.join("pages"),
            users_path: wiki_root.join("conf").join("users.auth.php"),
            acl_path: wiki_root.join("conf").join("acl.auth.php"),
            wiki_root,
            root_source,
        }
    }

    /// Metadata blob for a colon-delimited page path.
    pub fn meta_file(&self, page_path: &str) -> PathBuf {
        data_file(&self.meta_dir, page_path, "meta")
    }

    /// Change log for a colon-delimited page path.
    pub fn changes_file(&self, page_path: &str) -> PathBuf {
        data_file(&self.meta_dir, page_path, "changes")
    }

    /// Body text for a colon-delimited page path.
    pub fn text_file(&self, page_path: &str) -> PathBuf {
        data_file(&self.pages_dir, page_path, "txt")
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "wiki_root={} ({})\nmeta_dir={}\npages_dir={}\nusers_path={}\nacl_path={}",
            self.wiki_root.display(),
            self.root_source.as_str(),
            self.meta_dir.display(),
            self.pages_dir.display(),
            self.users_path.display(),
            self.acl_path.display(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub wiki_root_exists: bool,
    pub meta_dir_exists: bool,
    pub pages_dir_exists: bool,
    pub users_file_exists: bool,
    pub acl_file_exists: bool,
    pub warnings: Vec<String>,
}

pub fn resolve_paths(overrides: &PathOverrides) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(overrides, |key| env::var(key).ok())
}

pub fn resolve_paths_with_lookup(
    overrides: &PathOverrides,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedPaths> {
    if let Some(root) = &overrides.wiki_root {
        return Ok(ResolvedPaths::from_root(root.clone(), ValueSource::Flag));
    }
    if let Some(value) = lookup(WIKI_ROOT_ENV) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Ok(ResolvedPaths::from_root(
                PathBuf::from(trimmed),
                ValueSource::Env,
            ));
        }
    }
    let cwd = env::current_dir().context("failed to read current directory")?;
    Ok(ResolvedPaths::from_root(cwd, ValueSource::Default))
}

pub fn inspect_store(paths: &ResolvedPaths) -> StoreStatus {
    let wiki_root_exists = paths.wiki_root.exists();
    let meta_dir_exists = paths.meta_dir.exists();
    let pages_dir_exists = paths.pages_dir.exists();
    let users_file_exists = paths.users_path.is_file();
    let acl_file_exists = paths.acl_path.is_file();

    let mut warnings = Vec::new();
    if !meta_dir_exists {
        warnings.push("data/meta is missing; no pages will be discovered".to_string());
    }
    if !pages_dir_exists {
        warnings.push("data/pages is missing; all pages will export empty text".to_string());
    }
    if !users_file_exists {
        warnings.push("conf/users.auth.php is missing; export will fail".to_string());
    }
    if !acl_file_exists {
        warnings.push("conf/acl.auth.php is missing; export will fail".to_string());
    }

    StoreStatus {
        wiki_root_exists,
        meta_dir_exists,
        pages_dir_exists,
        users_file_exists,
        acl_file_exists,
        warnings,
    }
}

fn data_file(base: &Path, page_path: &str, extension: &str) -> PathBuf {
    let mut file = base.to_path_buf();
    let mut segments = page_path.split(PATH_SEPARATOR).peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_some() {
            file.push(segment);
        } else {
            file.push(format!("{segment}.{extension}"));
        }
    }
    file
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::{
        PathOverrides, ValueSource, WIKI_ROOT_ENV, inspect_store, resolve_paths_with_lookup,
    };

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let overrides = PathOverrides {
            wiki_root: Some(PathBuf::from("/srv/wiki-flag")),
        };
        let env = HashMap::from([(
            WIKI_ROOT_ENV.to_string(),
            "/srv/wiki-env".to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.wiki_root, PathBuf::from("/srv/wiki-flag"));
        assert_eq!(resolved.root_source, ValueSource::Flag);
    }

    #[test]
    fn resolve_paths_reads_env_when_no_flag() {
        let env = HashMap::from([(
            WIKI_ROOT_ENV.to_string(),
            "/srv/wiki-env".to_string(),
        )]);

        let resolved =
            resolve_paths_with_lookup(&PathOverrides::default(), |key| env.get(key).cloned())
                .expect("resolve paths");
        assert_eq!(resolved.wiki_root, PathBuf::from("/srv/wiki-env"));
        assert_eq!(resolved.root_source, ValueSource::Env);
        assert_eq!(resolved.meta_dir, PathBuf::from("/srv/wiki-env/data/meta"));
        assert_eq!(resolved.pages_dir, PathBuf::from("/srv/wiki-env/data/pages"));
    }

    #[test]
    fn resolve_paths_ignores_blank_env() {
        let env = HashMap::from([(WIKI_ROOT_ENV.to_string(), "   ".to_string())]);

        let resolved =
            resolve_paths_with_lookup(&PathOverrides::default(), |key| env.get(key).cloned())
                .expect("resolve paths");
        assert_eq!(resolved.root_source, ValueSource::Default);
    }

    #[test]
    fn page_paths_map_to_store_files() {
        let overrides = PathOverrides {
            wiki_root: Some(PathBuf::from("/wiki")),
        };
        let paths = resolve_paths_with_lookup(&overrides, |_| None).expect("resolve paths");

        assert_eq!(
            paths.meta_file("docs:dev:setup"),
            PathBuf::from("/wiki/data/meta/docs/dev/setup.meta")
        );
        assert_eq!(
            paths.changes_file("docs:dev:setup"),
            PathBuf::from("/wiki/data/meta/docs/dev/setup.changes")
        );
        assert_eq!(
            paths.text_file("start"),
            PathBuf::from("/wiki/data/pages/start.txt")
        );
        // Dots inside a segment are part of the page name, not an extension.
        assert_eq!(
            paths.text_file("docs:v1.2:intro"),
            PathBuf::from("/wiki/data/pages/docs/v1.2/intro.txt")
        );
    }

    #[test]
    fn inspect_store_warns_about_missing_layout() {
        let overrides = PathOverrides {
            wiki_root: Some(PathBuf::from("/nonexistent/wiki")),
        };
        let paths = resolve_paths_with_lookup(&overrides, |_| None).expect("resolve paths");
        let status = inspect_store(&paths);
        assert!(!status.meta_dir_exists);
        assert!(!status.acl_file_exists);
        assert_eq!(status.warnings.len(), 4);
    }
}
