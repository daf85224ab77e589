//! Gitignore-style path exclusion with negation, directory-only patterns,
//! a symmetric include-only allow-list, and a cached evaluation path.

use std::collections::HashMap;
use std::sync::RwLock;

use regex::Regex;

/// Patterns seeded before any user-supplied pattern, each contributing both
/// a root-anchored and a `**/`-prefixed variant.
const DEFAULT_EXCLUDES: &[&str] = &[
    ".git/",
    "node_modules/",
    ".DS_Store",
    "Thumbs.db",
    "*.tmp",
    "*.temp",
    ".env",
    ".env.*",
];

#[derive(Debug)]
struct CompiledPattern {
    original: String,
    regex: Regex,
    negate: bool,
    directory_only: bool,
}

/// Translate gitignore glob syntax into a regex body: `**` -> `.*`,
/// `*` -> `[^/]*`, `?` -> `.`, everything else escaped.
fn translate_glob(body: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push_str(".*");
                i += 2;
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push('.');
                i += 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out
}

/// Directory-only patterns are compiled to require the trailing slash that
/// `is_directory_excluded` appends to its candidate, rather than the normal
/// `($|/.*)` suffix that `is_excluded` candidates use.
fn wrap(anchored: bool, directory_only: bool, translated: &str) -> String {
    match (anchored, directory_only) {
        (true, true) => format!("^{translated}/$"),
        (true, false) => format!("^{translated}$"),
        (false, true) => format!("(^|.*/)({translated})/$"),
        (false, false) => format!("(^|.*/)({translated})($|/.*)"),
    }
}

fn compile_pattern(raw: &str) -> CompiledPattern {
    let negate = raw.starts_with('!');
    let after_negate = if negate { &raw[1..] } else { raw };
    let directory_only = after_negate.len() > 1 && after_negate.ends_with('/');
    let trimmed = if directory_only {
        &after_negate[..after_negate.len() - 1]
    } else {
        after_negate
    };
    let anchored = trimmed.starts_with('/');
    let body = if anchored { &trimmed[1..] } else { trimmed };

    let translated = translate_glob(body);
    let regex = Regex::new(&wrap(anchored, directory_only, &translated)).unwrap_or_else(|_| {
        let escaped = regex::escape(body);
        Regex::new(&wrap(anchored, directory_only, &escaped))
            .expect("escaped literal pattern must compile")
    });

    CompiledPattern {
        original: raw.to_string(),
        regex,
        negate,
        directory_only,
    }
}

fn normalize_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut normalized = replaced.as_str();
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped;
    }
    normalized.trim_start_matches('/').to_string()
}

fn evaluate(patterns: &[CompiledPattern], normalized: &str, with_slash: Option<&str>) -> bool {
    let mut excluded = false;
    for pattern in patterns {
        let candidate = if pattern.directory_only {
            with_slash
        } else {
            Some(normalized)
        };
        let Some(candidate) = candidate else {
            continue;
        };
        if pattern.regex.is_match(candidate) {
            excluded = !pattern.negate;
        }
    }
    excluded
}

pub struct ExclusionEngine {
    patterns: RwLock<Vec<CompiledPattern>>,
    include_patterns: RwLock<Vec<CompiledPattern>>,
    cache: RwLock<HashMap<String, bool>>,
}

impl ExclusionEngine {
    pub fn new() -> Self {
        let mut patterns = Vec::new();
        for base in DEFAULT_EXCLUDES {
            patterns.push(compile_pattern(&format!("/{base}")));
            patterns.push(compile_pattern(&format!("**/{base}")));
        }
        Self {
            patterns: RwLock::new(patterns),
            include_patterns: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Build an engine seeded with the defaults, then the caller's exclude
    /// patterns (appended in order — later entries, including negations,
    /// take precedence) and include-only allow-list.
    pub fn with_patterns(exclude: &[String], include_only: &[String]) -> Self {
        let engine = Self::new();
        engine.add_patterns(exclude);
        if !include_only.is_empty() {
            let mut include = engine.include_patterns.write().unwrap();
            include.extend(include_only.iter().map(|p| compile_pattern(p)));
        }
        engine
    }

    pub fn add_patterns(&self, patterns: &[String]) {
        let mut list = self.patterns.write().unwrap();
        list.extend(patterns.iter().map(|p| compile_pattern(p)));
        drop(list);
        self.cache.write().unwrap().clear();
    }

    pub fn remove_patterns(&self, patterns: &[String]) {
        let mut list = self.patterns.write().unwrap();
        list.retain(|p| !patterns.iter().any(|removed| removed == &p.original));
        drop(list);
        self.cache.write().unwrap().clear();
    }

    pub fn patterns(&self) -> Vec<String> {
        self.patterns
            .read()
            .unwrap()
            .iter()
            .map(|p| p.original.clone())
            .collect()
    }

    fn included(&self, normalized: &str, with_slash: Option<&str>) -> bool {
        let include = self.include_patterns.read().unwrap();
        if include.is_empty() {
            return true;
        }
        evaluate(&include, normalized, with_slash)
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        if let Some(cached) = self.cache.read().unwrap().get(&normalized) {
            return *cached;
        }

        let result = if !self.included(&normalized, None) {
            true
        } else {
            let patterns = self.patterns.read().unwrap();
            evaluate(&patterns, &normalized, None)
        };

        self.cache.write().unwrap().insert(normalized, result);
        result
    }

    pub fn is_directory_excluded(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        let cache_key = format!("{normalized}__DIR__");
        if let Some(cached) = self.cache.read().unwrap().get(&cache_key) {
            return *cached;
        }

        let with_slash = format!("{normalized}/");
        let result = if !self.included(&normalized, Some(&with_slash)) {
            true
        } else {
            let patterns = self.patterns.read().unwrap();
            evaluate(&patterns, &normalized, Some(&with_slash))
        };

        self.cache.write().unwrap().insert(cache_key, result);
        result
    }
}

impl Default for ExclusionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_excludes_cover_common_artifact_files() {
        let engine = ExclusionEngine::new();
        assert!(engine.is_excluded(".DS_Store"));
        assert!(engine.is_excluded("src/.DS_Store"));
        assert!(engine.is_excluded("build.tmp"));
        assert!(engine.is_excluded(".env"));
        assert!(engine.is_excluded(".env.local"));
        assert!(!engine.is_excluded("src/main.rs"));
    }

    #[test]
    fn default_excludes_cover_common_artifact_directories() {
        let engine = ExclusionEngine::new();
        assert!(engine.is_directory_excluded(".git"));
        assert!(engine.is_directory_excluded("vendor/node_modules"));
        assert!(!engine.is_directory_excluded("src"));
    }

    #[test]
    fn negation_overrides_an_earlier_exclude() {
        let engine = ExclusionEngine::with_patterns(
            &["*.log".to_string(), "!important.log".to_string()],
            &[],
        );
        assert!(engine.is_excluded("test.log"));
        assert!(!engine.is_excluded("important.log"));
    }

    #[test]
    fn order_of_user_patterns_is_significant() {
        let engine = ExclusionEngine::with_patterns(
            &["!keep.log".to_string(), "*.log".to_string()],
            &[],
        );
        // *.log comes after the negation, so it wins back the exclusion.
        assert!(engine.is_excluded("keep.log"));
    }

    #[test]
    fn directory_only_pattern_requires_trailing_slash_context() {
        let engine = ExclusionEngine::with_patterns(&["dist/".to_string()], &[]);
        assert!(!engine.is_excluded("dist"));
        assert!(engine.is_directory_excluded("dist"));
        assert!(engine.is_directory_excluded("nested/dist"));
    }

    #[test]
    fn anchored_pattern_only_matches_at_root() {
        let engine = ExclusionEngine::with_patterns(&["/only-root.txt".to_string()], &[]);
        assert!(engine.is_excluded("only-root.txt"));
        assert!(!engine.is_excluded("nested/only-root.txt"));
    }

    #[test]
    fn unanchored_basename_pattern_matches_any_depth() {
        let engine = ExclusionEngine::with_patterns(&["secrets.yml".to_string()], &[]);
        assert!(engine.is_excluded("secrets.yml"));
        assert!(engine.is_excluded("deeply/nested/secrets.yml"));
    }

    #[test]
    fn include_only_allow_list_excludes_non_matching_paths() {
        let engine = ExclusionEngine::with_patterns(&[], &["*.rs".to_string()]);
        assert!(!engine.is_excluded("src/main.rs"));
        assert!(engine.is_excluded("README.md"));
    }

    #[test]
    fn add_patterns_invalidates_the_cache() {
        let engine = ExclusionEngine::new();
        assert!(!engine.is_excluded("newly-ignored.txt"));
        engine.add_patterns(&["newly-ignored.txt".to_string()]);
        assert!(engine.is_excluded("newly-ignored.txt"));
    }

    #[test]
    fn remove_patterns_invalidates_the_cache() {
        let engine = ExclusionEngine::with_patterns(&["scratch.txt".to_string()], &[]);
        assert!(engine.is_excluded("scratch.txt"));
        engine.remove_patterns(&["scratch.txt".to_string()]);
        assert!(!engine.is_excluded("scratch.txt"));
    }

    #[test]
    fn double_star_matches_any_number_of_components() {
        let engine = ExclusionEngine::with_patterns(&["docs/**/draft.md".to_string()], &[]);
        assert!(engine.is_excluded("docs/x/draft.md"));
        assert!(engine.is_excluded("docs/a/b/c/draft.md"));
    }
}
