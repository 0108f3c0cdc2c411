//! Suffix allowlists and boundary patterns that drive strategy selection.

use std::collections::BTreeSet;
use std::path::Path;

use regex::RegexSet;

pub const DEFAULT_TEXT_SUFFIXES: &[&str] = &[".md", ".markdown", ".txt"];

pub const DEFAULT_CODE_SUFFIXES: &[&str] = &[
    ".py", ".js", ".ts", ".tsx", ".java", ".go", ".rs", ".dart", ".c", ".cc", ".cpp", ".h", ".hpp",
    ".sh", ".yaml", ".yml", ".json",
];

pub const DEFAULT_BOUNDARY_PATTERN: &str = r"^\s*(def\s+|class\s+|func\s+|fn\s+|interface\s+|type\s+|export\s+function\s+|public\s+|private\s+|protected\s+)";

/// Chunking strategy for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Paragraph splitting at blank lines.
    Text,
    /// Segments starting at declaration boundaries.
    Code,
    /// Fixed overlapping windows.
    Window,
}

/// Line budgets for the three strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Text buffer is flushed once it holds this many lines.
    pub text_max_lines: usize,
    /// Code segments longer than this are re-split with the window.
    pub code_max_segment: usize,
    pub window: usize,
    pub overlap: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            text_max_lines: 80,
            code_max_segment: 180,
            window: 120,
            overlap: 20,
        }
    }
}

/// Overridable table mapping suffixes to strategies.
///
/// Every suffix in either list is indexable; the code list additionally
/// selects the boundary strategy. Any other suffix is neither indexed by the
/// change detector nor chunked specially, but a caller chunking it directly
/// gets the window strategy.
#[derive(Debug, Clone)]
pub struct ChunkRules {
    text_suffixes: BTreeSet<String>,
    code_suffixes: BTreeSet<String>,
    boundaries: RegexSet,
    pub limits: ChunkLimits,
}

impl ChunkRules {
    /// Build a rule table. Suffixes are lower-cased and given a leading dot.
    ///
    /// # Errors
    ///
    /// Returns an error if a boundary pattern is not a valid regex.
    pub fn new<S: AsRef<str>>(
        text_suffixes: &[S],
        code_suffixes: &[S],
        boundary_patterns: &[S],
        limits: ChunkLimits,
    ) -> Result<Self, regex::Error> {
        let boundaries = RegexSet::new(boundary_patterns.iter().map(AsRef::as_ref))?;
        Ok(Self {
            text_suffixes: normalize_suffixes(text_suffixes),
            code_suffixes: normalize_suffixes(code_suffixes),
            boundaries,
            limits,
        })
    }

    #[must_use]
    pub fn strategy_for(&self, path: &str) -> Strategy {
        let Some(suffix) = suffix_of(path) else {
            return Strategy::Window;
        };
        if self.text_suffixes.contains(&suffix) {
            Strategy::Text
        } else if self.code_suffixes.contains(&suffix) {
            Strategy::Code
        } else {
            Strategy::Window
        }
    }

    /// Whether the change detector should pick this path up at all.
    #[must_use]
    pub fn is_indexable(&self, path: &str) -> bool {
        suffix_of(path).is_some_and(|s| {
            self.text_suffixes.contains(&s) || self.code_suffixes.contains(&s)
        })
    }

    #[must_use]
    pub fn is_boundary(&self, line: &str) -> bool {
        self.boundaries.is_match(line)
    }
}

impl Default for ChunkRules {
    fn default() -> Self {
        let boundaries = RegexSet::new([DEFAULT_BOUNDARY_PATTERN])
            .unwrap_or_else(|_| RegexSet::empty());
        Self {
            text_suffixes: normalize_suffixes(DEFAULT_TEXT_SUFFIXES),
            code_suffixes: normalize_suffixes(DEFAULT_CODE_SUFFIXES),
            boundaries,
            limits: ChunkLimits::default(),
        }
    }
}

fn normalize_suffixes<S: AsRef<str>>(suffixes: &[S]) -> BTreeSet<String> {
    suffixes
        .iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty() && s != ".")
        .map(|s| if s.starts_with('.') { s } else { format!(".{s}") })
        .collect()
}

fn suffix_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}
