use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use walkdir::WalkDir;

use crate::meta::{self, PageMeta};
use crate::runtime::{PATH_SEPARATOR, ResolvedPaths};

const META_SUFFIX: &str = ".meta";

/// Body text is loaded explicitly and can be purged again to bound memory;
/// reading never mutates implicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageText {
    Unloaded,
    Loaded(String),
}

/// Immutable fact sheet for one page. Reconstructed wholesale by
/// [`Page::reload`]; the only mutable aspect is the cached body text.
#[derive(Debug, Clone)]
pub struct Page {
    pub path: String,
    pub meta: PageMeta,
    pub deleted: bool,
    text: PageText,
    text_path: PathBuf,
}

impl Page {
    /// Loads a page's fact sheet from the store. A missing metadata file is
    /// fatal; a missing change log means the page is live, and a missing
    /// body text file reads as empty.
    pub fn load(paths: &ResolvedPaths, page_path: &str, eager: bool) -> Result<Self> {
        let meta_path = paths.meta_file(page_path);
        if !meta_path.is_file() {
            bail!(
                "page {page_path} does not exist: missing metadata file {}",
                meta_path.display()
            );
        }
        let raw = fs::read_to_string(&meta_path)
            .with_context(|| format!("failed to read {}", meta_path.display()))?;
        let blob: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse metadata blob {}", meta_path.display()))?;
        let meta = meta::parse_page_meta(&blob);

        let changes_path = paths.changes_file(page_path);
        let deleted = if changes_path.is_file() {
            let log = fs::read_to_string(&changes_path)
                .with_context(|| format!("failed to read {}", changes_path.display()))?;
            meta::deleted_from_changelog(&log)
        } else {
            false
        };

        let mut page = Self {
            path: page_path.to_string(),
            meta,
            deleted,
            text: PageText::Unloaded,
            text_path: paths.text_file(page_path),
        };
        if page.meta.title.is_none() {
            page.meta.title = meta::title_from_text(page.ensure_text()?);
        }
        if eager {
            page.ensure_text()?;
        }
        Ok(page)
    }

    /// Re-reads the whole fact sheet from storage, dropping any cached text.
    pub fn reload(&mut self, paths: &ResolvedPaths, eager: bool) -> Result<()> {
        *self = Self::load(paths, &self.path, eager)?;
        Ok(())
    }

    /// Loads the body text on first call; later calls return the cached
    /// value. A page without a text file has empty text.
    pub fn ensure_text(&mut self) -> Result<&str> {
        if self.text == PageText::Unloaded {
            let content = match fs::read_to_string(&self.text_path) {
                Ok(content) => content,
                Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to read {}", self.text_path.display()));
                }
            };
            self.text = PageText::Loaded(content);
        }
        match &self.text {
            PageText::Loaded(content) => Ok(content),
            PageText::Unloaded => unreachable!("text was just loaded"),
        }
    }

    /// The cached body text, if loaded.
    pub fn text(&self) -> Option<&str> {
        match &self.text {
            PageText::Loaded(content) => Some(content),
            PageText::Unloaded => None,
        }
    }

    /// Drops the cached body text without touching the metadata.
    pub fn purge_text(&mut self) {
        self.text = PageText::Unloaded;
    }
}

/// All pages of one wiki store, keyed by page path. The map order is the
/// export order.
#[derive(Debug)]
pub struct WikiStore {
    pub pages: BTreeMap<String, Page>,
}

impl WikiStore {
    /// Discovers every page in the store and loads its fact sheet. With
    /// `eager` set, body text is materialized up front instead of lazily.
    pub fn load(paths: &ResolvedPaths, eager: bool) -> Result<Self> {
        let mut pages = BTreeMap::new();
        for page_path in discover_page_paths(paths)? {
            let page = Page::load(paths, &page_path, eager)?;
            pages.insert(page_path, page);
        }
        Ok(Self { pages })
    }

    /// Drops everything cached in memory and re-reads the store.
    pub fn reload(&mut self, paths: &ResolvedPaths, eager: bool) -> Result<()> {
        self.pages = Self::load(paths, eager)?.pages;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Walks the metadata directory and maps every `*.meta` file back to its
/// colon-delimited page path, sorted.
pub fn discover_page_paths(paths: &ResolvedPaths) -> Result<Vec<String>> {
    let mut found = Vec::new();
    if !paths.meta_dir.exists() {
        return Ok(found);
    }
    let separator = PATH_SEPARATOR.to_string();
    for entry in WalkDir::new(&paths.meta_dir).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("failed to walk {}", paths.meta_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&paths.meta_dir) else {
            continue;
        };
        let mut segments = Vec::new();
        for component in relative.components() {
            if let Component::Normal(part) = component
                && let Some(part) = part.to_str()
            {
                segments.push(part);
            }
        }
        let Some(file_name) = segments.pop() else {
            continue;
        };
        let Some(stem) = file_name.strip_suffix(META_SUFFIX) else {
            continue;
        };
        if stem.is_empty() {
            continue;
        }
        segments.push(stem);
        found.push(segments.join(&separator));
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{Page, WikiStore, discover_page_paths};
    use crate::runtime::{PathOverrides, resolve_paths_with_lookup};

    fn store_paths(root: &Path) -> crate::runtime::ResolvedPaths {
        let overrides = PathOverrides {
            wiki_root: Some(root.to_path_buf()),
        };
        resolve_paths_with_lookup(&overrides, |_| None).expect("resolve paths")
    }

    fn write_page(root: &Path, relative: &str, meta: &str, text: Option<&str>) {
        let meta_path = root.join("data/meta").join(format!("{relative}.meta"));
        fs::create_dir_all(meta_path.parent().expect("parent")).expect("create meta dirs");
        fs::write(&meta_path, meta).expect("write meta");
        if let Some(text) = text {
            let text_path = root.join("data/pages").join(format!("{relative}.txt"));
            fs::create_dir_all(text_path.parent().expect("parent")).expect("create page dirs");
            fs::write(&text_path, text).expect("write text");
        }
    }

    #[test]
    fn load_reads_metadata_and_lazy_text() {
        let temp = tempdir().expect("tempdir");
        write_page(
            temp.path(),
            "docs/dev/setup",
            r#"{"current": {"title": "Setup"}, "persistent": {"creator": "alice"}}"#,
            Some("page body"),
        );
        let paths = store_paths(temp.path());

        let mut page = Page::load(&paths, "docs:dev:setup", false).expect("load page");
        assert_eq!(page.meta.title.as_deref(), Some("Setup"));
        assert_eq!(page.meta.creator.as_deref(), Some("alice"));
        assert!(!page.deleted);
        assert_eq!(page.text(), None);

        assert_eq!(page.ensure_text().expect("text"), "page body");
        assert_eq!(page.text(), Some("page body"));

        page.purge_text();
        assert_eq!(page.text(), None);
        // Metadata survives the purge.
        assert_eq!(page.meta.title.as_deref(), Some("Setup"));
    }

    #[test]
    fn missing_metadata_is_fatal() {
        let temp = tempdir().expect("tempdir");
        let paths = store_paths(temp.path());
        let err = Page::load(&paths, "ghost", false).expect_err("must fail");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn missing_text_file_reads_as_empty() {
        let temp = tempdir().expect("tempdir");
        write_page(temp.path(), "bare", r#"{"current": {"title": "Bare"}}"#, None);
        let paths = store_paths(temp.path());

        let mut page = Page::load(&paths, "bare", false).expect("load page");
        assert_eq!(page.ensure_text().expect("text"), "");
    }

    #[test]
    fn title_falls_back_to_first_heading() {
        let temp = tempdir().expect("tempdir");
        write_page(
            temp.path(),
            "guide",
            r#"{"current": {}}"#,
            Some("intro\n====== Guide Heading ======\nbody\n"),
        );
        let paths = store_paths(temp.path());

        let page = Page::load(&paths, "guide", false).expect("load page");
        assert_eq!(page.meta.title.as_deref(), Some("Guide Heading"));
    }

    #[test]
    fn eager_load_materializes_text() {
        let temp = tempdir().expect("tempdir");
        write_page(
            temp.path(),
            "eager",
            r#"{"current": {"title": "Eager"}}"#,
            Some("body"),
        );
        let paths = store_paths(temp.path());

        let page = Page::load(&paths, "eager", true).expect("load page");
        assert_eq!(page.text(), Some("body"));
    }

    #[test]
    fn deletion_comes_from_the_change_log() {
        let temp = tempdir().expect("tempdir");
        write_page(temp.path(), "gone", r#"{"current": {"title": "Gone"}}"#, None);
        let changes = temp.path().join("data/meta/gone.changes");
        fs::write(
            &changes,
            "1493822400\t127.0.0.1\tC\tgone\talice\tcreated\n\
             1493822500\t127.0.0.1\tD\tgone\talice\tremoved\n",
        )
        .expect("write changes");
        let paths = store_paths(temp.path());

        let page = Page::load(&paths, "gone", false).expect("load page");
        assert!(page.deleted);
    }

    #[test]
    fn store_discovers_pages_in_sorted_order() {
        let temp = tempdir().expect("tempdir");
        write_page(temp.path(), "zeta", r#"{"current": {"title": "Z"}}"#, None);
        write_page(temp.path(), "alpha/beta", r#"{"current": {"title": "AB"}}"#, None);
        write_page(temp.path(), "alpha/alpha", r#"{"current": {"title": "AA"}}"#, None);
        let paths = store_paths(temp.path());

        let discovered = discover_page_paths(&paths).expect("discover");
        assert_eq!(discovered, vec!["alpha:alpha", "alpha:beta", "zeta"]);

        let store = WikiStore::load(&paths, false).expect("load store");
        assert_eq!(store.len(), 3);
        let ordered: Vec<&String> = store.pages.keys().collect();
        assert_eq!(ordered, vec!["alpha:alpha", "alpha:beta", "zeta"]);
    }

    #[test]
    fn store_reload_picks_up_new_pages() {
        let temp = tempdir().expect("tempdir");
        write_page(temp.path(), "first", r#"{"current": {"title": "First"}}"#, None);
        let paths = store_paths(temp.path());

        let mut store = WikiStore::load(&paths, false).expect("load store");
        assert_eq!(store.len(), 1);

        write_page(temp.path(), "second", r#"{"current": {"title": "Second"}}"#, None);
        store.reload(&paths, false).expect("reload");
        assert_eq!(store.len(), 2);
        assert!(!store.is_empty());
    }
}
