use gcq_code_chunker::Language;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::{Match, WalkBuilder};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Directory names never descended into.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".gcq",
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
];

/// Extensions never indexed even when a language would claim them.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg", "pdf", "zip", "gz", "tgz", "bz2",
    "xz", "7z", "rar", "tar", "jar", "class", "so", "dylib", "dll", "exe", "o", "a", "lib", "bin",
    "wasm", "pyc", "pyo", "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4", "mov", "avi", "wav",
    "db", "sqlite", "idx", "lock",
];

/// Project-local ignore file honoured alongside `.gitignore`.
pub const IGNORE_FILE: &str = ".gcqignore";

/// Per-directory ignore matchers, keyed by project-relative directory.
type RuleCache = HashMap<PathBuf, Option<Arc<Gitignore>>>;

/// Walks a project and decides which files are indexable.
#[derive(Debug, Clone)]
pub struct FileScanner {
    root: PathBuf,
    extra_excludes: Vec<PathBuf>,
    rules: Arc<Mutex<RuleCache>>,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extra_excludes: Vec::new(),
            rules: Arc::default(),
        }
    }

    /// Drop cached ignore rules so edited ignore files take effect.
    pub fn reload_ignores(&self) {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Skip everything under `dir` (e.g. a relocated daemon directory).
    #[must_use]
    pub fn exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_excludes.push(dir.into());
        self
    }

    /// Absolute paths of all admissible files, sorted.
    pub fn scan(&self) -> Vec<PathBuf> {
        let extra = self.extra_excludes.clone();
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .require_git(false)
            .add_custom_ignore_filename(IGNORE_FILE)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                if !is_dir {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !EXCLUDED_DIRS.contains(&name.as_ref())
                    && !extra.iter().any(|dir| entry.path().starts_with(dir))
            })
            .build();

        let mut files: Vec<PathBuf> = walker
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    log::warn!("Skipping unreadable entry: {err}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(ignore::DirEntry::into_path)
            .filter(|path| has_indexable_name(path))
            .collect();
        files.sort();
        files
    }

    /// Whether a project-relative path may be indexed.
    ///
    /// Applies the same rules as [`scan`](Self::scan): excluded and hidden
    /// components, `.gitignore`, `.git/info/exclude` and [`IGNORE_FILE`] in
    /// every ancestor directory.
    #[must_use]
    pub fn admits(&self, rel: &str) -> bool {
        let path = Path::new(rel);
        let excluded_component = path.components().any(|c| match c {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                name.starts_with('.') || EXCLUDED_DIRS.contains(&name.as_ref())
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => true,
            Component::CurDir => false,
        });
        if excluded_component {
            return false;
        }
        let abs = self.root.join(path);
        if self.extra_excludes.iter().any(|dir| abs.starts_with(dir)) {
            return false;
        }
        has_indexable_name(path) && !self.ignored(path)
    }

    /// Deepest directory with a matching rule decides, as git does.
    fn ignored(&self, rel: &Path) -> bool {
        let mut dirs: Vec<&Path> = rel.ancestors().skip(1).collect();
        dirs.reverse();
        let mut decision = false;
        for dir in dirs {
            let Some(rules) = self.rules_for(dir) else {
                continue;
            };
            let Ok(local) = rel.strip_prefix(dir) else {
                continue;
            };
            match rules.matched_path_or_any_parents(local, false) {
                Match::Ignore(_) => decision = true,
                Match::Whitelist(_) => decision = false,
                Match::None => {}
            }
        }
        decision
    }

    fn rules_for(&self, dir: &Path) -> Option<Arc<Gitignore>> {
        let mut cache = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(dir.to_path_buf())
            .or_insert_with(|| self.load_rules(dir))
            .clone()
    }

    fn load_rules(&self, dir: &Path) -> Option<Arc<Gitignore>> {
        let abs = self.root.join(dir);
        let mut sources = Vec::new();
        if dir.as_os_str().is_empty() {
            sources.push(abs.join(".git").join("info").join("exclude"));
        }
        sources.push(abs.join(".gitignore"));
        sources.push(abs.join(IGNORE_FILE));

        let mut builder = GitignoreBuilder::new(&abs);
        let mut any = false;
        for source in sources.iter().filter(|p| p.is_file()) {
            any = true;
            if let Some(err) = builder.add(source) {
                log::warn!("Ignoring bad rules in {}: {err}", source.display());
            }
        }
        if !any {
            return None;
        }
        match builder.build() {
            Ok(rules) => Some(Arc::new(rules)),
            Err(err) => {
                log::warn!("Failed to build ignore rules for {}: {err}", abs.display());
                None
            }
        }
    }
}

fn has_indexable_name(path: &Path) -> bool {
    let binary = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
    !binary && Language::from_path(path).is_some()
}
