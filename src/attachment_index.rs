//! Name-token index over a folder of personalised attachments
//!
//! The index is built once per run so each recipient costs a walk over the
//! in-memory entries instead of a directory scan. Keys are token sets: the
//! case-folded, accent-stripped, punctuation-stripped words of a file's stem.

use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Generic words ignored when a file name is compared as a subset of a person's name
pub const STOPWORDS: &[&str] = &["invitacion", "invitation", "inv"];

/// Share of the recipient's tokens that must appear in a file name for a partial match
pub const MIN_OVERLAP_RATIO: f64 = 0.8;

/// Context keys searched, in order, for the recipient's name
pub const NAME_KEYS: &[&str] = &[
    "nombres",
    "Nombres",
    "NOMBRES",
    "Nombre",
    "nombre",
    "nombre_completo",
    "NOMBRE",
    "name",
    "Name",
    "full_name",
];

const CANDIDATE_EXTENSION: &str = "pdf";

/// Strip accents and punctuation, then lowercase
///
/// ```
/// use campaign_dispatch::attachment_index::normalize;
///
/// assert_eq!(normalize("José-Luis Peña."), "joseluis pena");
/// ```
pub fn normalize(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Normalised, whitespace-separated words of `text`
pub fn tokenize(text: &str) -> TokenSet {
    TokenSet(
        normalize(text)
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    )
}

/// First non-blank name-like value in a recipient's context
pub fn name_from_context(context: &HashMap<String, String>) -> Option<String> {
    NAME_KEYS.iter().find_map(|key| {
        context
            .get(*key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// Set of normalised words
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenSet(BTreeSet<String>);

impl TokenSet {
    /// Number of tokens
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no token survived normalisation
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate tokens in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    fn is_subset(&self, other: &TokenSet) -> bool {
        self.0.is_subset(&other.0)
    }

    fn without_stopwords(&self) -> TokenSet {
        TokenSet(
            self.0
                .iter()
                .filter(|t| !STOPWORDS.contains(&t.as_str()))
                .cloned()
                .collect(),
        )
    }

    fn overlap(&self, other: &TokenSet) -> usize {
        self.0.intersection(&other.0).count()
    }
}

impl<S: Into<String>> FromIterator<S> for TokenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        TokenSet(iter.into_iter().map(Into::into).collect())
    }
}

/// Two files that reduced to the same token set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collision {
    /// Shared token set
    pub tokens: TokenSet,
    /// File kept in the index (scanned last)
    pub kept: PathBuf,
    /// File shadowed by `kept`
    pub replaced: PathBuf,
}

/// Which rule of the lookup cascade produced a match
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchRule {
    /// Every name token appears in the file name
    Superset,
    /// Every file-name token (minus stopwords) appears in the name
    Subset,
    /// At least [`MIN_OVERLAP_RATIO`] of the name tokens appear in the file name
    Overlap,
}

impl MatchRule {
    /// Short name used in debug events
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRule::Superset => "superset",
            MatchRule::Subset => "subset",
            MatchRule::Overlap => "overlap",
        }
    }
}

/// Token-set index over one folder
#[derive(Clone, Debug, Default)]
pub struct AttachmentIndex {
    entries: BTreeMap<TokenSet, PathBuf>,
    collisions: Vec<Collision>,
}

impl AttachmentIndex {
    /// Scan `folder` (non-recursively) for PDF files
    ///
    /// A missing folder yields an empty index. Files are visited in name
    /// order, so when two names reduce to the same token set the one that
    /// sorts last is kept and the collision is recorded.
    pub async fn build(folder: &Path) -> Result<Self> {
        let mut index = AttachmentIndex::default();

        if !tokio::fs::try_exists(folder).await? {
            tracing::warn!(folder = %folder.display(), "attachment folder does not exist");
            return Ok(index);
        }

        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(folder).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || !is_candidate(&path) {
                continue;
            }
            files.push(path);
        }
        files.sort();

        for path in files {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            index.insert(tokenize(&stem), path);
        }

        tracing::debug!(
            folder = %folder.display(),
            entries = index.len(),
            collisions = index.collisions.len(),
            "built attachment index"
        );
        Ok(index)
    }

    /// Add an entry, replacing (and recording) any entry with the same tokens
    pub fn insert(&mut self, tokens: TokenSet, path: PathBuf) {
        if tokens.is_empty() {
            return;
        }
        if let Some(replaced) = self.entries.insert(tokens.clone(), path.clone()) {
            tracing::warn!(
                kept = %path.display(),
                replaced = %replaced.display(),
                "attachment names collide; keeping the last one"
            );
            self.collisions.push(Collision {
                tokens,
                kept: path,
                replaced,
            });
        }
    }

    /// Number of indexed files
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no file was indexed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collisions recorded while building
    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    /// Find the file for a recipient's name tokens
    pub fn lookup(&self, name: &TokenSet) -> Option<&Path> {
        self.lookup_with_rule(name).map(|(path, _)| path)
    }

    /// Like [`AttachmentIndex::lookup`], also reporting the rule that matched
    ///
    /// Rules are tried in order: superset, subset after removing
    /// [`STOPWORDS`], then the best overlap of at least
    /// [`MIN_OVERLAP_RATIO`]. An empty token set never matches.
    pub fn lookup_with_rule(&self, name: &TokenSet) -> Option<(&Path, MatchRule)> {
        if name.is_empty() {
            return None;
        }

        if let Some(path) = self
            .entries
            .iter()
            .find(|(file, _)| name.is_subset(file))
            .map(|(_, path)| path.as_path())
        {
            return Some((path, MatchRule::Superset));
        }

        if let Some(path) = self
            .entries
            .iter()
            .find(|(file, _)| {
                let filtered = file.without_stopwords();
                !filtered.is_empty() && filtered.is_subset(name)
            })
            .map(|(_, path)| path.as_path())
        {
            return Some((path, MatchRule::Subset));
        }

        let required = name.len() as f64 * MIN_OVERLAP_RATIO;
        let mut best: Option<(usize, &PathBuf)> = None;
        for (file, path) in &self.entries {
            let overlap = file.overlap(name);
            if overlap == 0 || (overlap as f64) < required {
                continue;
            }
            if best.is_none_or(|(n, _)| overlap > n) {
                best = Some((overlap, path));
            }
        }
        best.map(|(_, path)| (path.as_path(), MatchRule::Overlap))
    }
}

fn is_candidate(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(CANDIDATE_EXTENSION))
}

// unwrap/expect are acceptable in tests for concise failure messages
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index_of(names: &[&str]) -> AttachmentIndex {
        let mut index = AttachmentIndex::default();
        for name in names {
            index.insert(tokenize(name), PathBuf::from(format!("/pdfs/{name}.pdf")));
        }
        index
    }

    #[test]
    fn normalize_strips_accents_and_punctuation() {
        assert_eq!(normalize("Ána María López-Pérez."), "ana maria lopezperez");
        assert_eq!(normalize("O'Connor, Jr"), "oconnor jr");
        assert_eq!(normalize("file_01"), "file_01");
    }

    #[test]
    fn tokenize_is_order_and_case_insensitive() {
        assert_eq!(tokenize("LÓPEZ ana  María"), tokenize("ana maria lopez"));
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn name_from_context_follows_priority() {
        let ctx: HashMap<String, String> = [
            ("name", "Second"),
            ("Nombre", "First"),
            ("nombres", "   "),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(name_from_context(&ctx).as_deref(), Some("First"));
        assert_eq!(name_from_context(&HashMap::new()), None);
    }

    #[test]
    fn superset_match_wins() {
        let index = index_of(&["Invitacion Ana Maria Lopez Garcia", "Pedro Gomez"]);
        let (path, rule) = index.lookup_with_rule(&tokenize("Ana López")).unwrap();
        assert_eq!(rule, MatchRule::Superset);
        assert!(path.ends_with("Invitacion Ana Maria Lopez Garcia.pdf"));
    }

    #[test]
    fn subset_after_stopwords_matches_longer_name() {
        let index = index_of(&["invitacion ana maria lopez"]);
        let (path, rule) = index
            .lookup_with_rule(&tokenize("Ana Maria Lopez Fernandez"))
            .unwrap();
        assert_eq!(rule, MatchRule::Subset);
        assert!(path.ends_with("invitacion ana maria lopez.pdf"));
    }

    #[test]
    fn full_name_against_invitation_file_resolves_by_superset() {
        // The file also qualifies for the subset rule, but superset is tried first
        let index = index_of(&["Ana Maria Lopez Invitacion"]);
        let tokens = tokenize("Ana Maria Lopez");
        let (path, rule) = index.lookup_with_rule(&tokens).unwrap();
        assert_eq!(rule, MatchRule::Superset);
        assert!(path.ends_with("Ana Maria Lopez Invitacion.pdf"));

        let file = tokenize("Ana Maria Lopez Invitacion");
        assert!(file.without_stopwords().is_subset(&tokens));
    }

    #[test]
    fn stopword_only_file_does_not_match_everyone() {
        let index = index_of(&["Invitacion"]);
        assert_eq!(index.lookup(&tokenize("Carlos Ruiz")), None);
    }

    #[test]
    fn overlap_rule_needs_eighty_percent() {
        let index = index_of(&["juan carlos perez diaz extra"]);
        // 4 of 5 name tokens present: 80%
        let (_, rule) = index
            .lookup_with_rule(&tokenize("Juan Carlos Perez Diaz Soto"))
            .unwrap();
        assert_eq!(rule, MatchRule::Overlap);
        // 3 of 5: below threshold
        assert_eq!(index.lookup(&tokenize("Juan Carlos Perez Mora Soto")), None);
    }

    #[test]
    fn overlap_rule_prefers_highest_overlap() {
        // "a a0 ..." sorts first but shares only 8 of the 10 tokens
        let index = index_of(&["a a0 b c d e f g h", "a b c d e f g h i x"]);
        let path = index.lookup(&tokenize("a b c d e f g h i j")).unwrap();
        assert!(path.ends_with("a b c d e f g h i x.pdf"));
    }

    #[test]
    fn unrelated_name_has_no_match() {
        let index = index_of(&["Ana Maria Lopez Invitacion", "Pedro Gomez"]);
        assert_eq!(index.lookup(&tokenize("Carlos Ruiz")), None);
    }

    #[test]
    fn empty_name_never_matches() {
        let index = index_of(&["Ana"]);
        assert_eq!(index.lookup(&TokenSet::default()), None);
    }

    #[tokio::test]
    async fn build_indexes_only_top_level_pdfs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Ana López.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("Pedro Gómez.PDF"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("Deep.pdf"), b"%PDF").unwrap();

        let index = AttachmentIndex::build(dir.path()).await.unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.lookup(&tokenize("pedro gomez")).is_some());
        assert!(index.lookup(&tokenize("deep")).is_none());
        assert!(index.collisions().is_empty());
    }

    #[tokio::test]
    async fn build_records_collisions_last_name_wins() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Ana Lopez.pdf"), b"1").unwrap();
        std::fs::write(dir.path().join("ana  lópez.pdf"), b"2").unwrap();

        let index = AttachmentIndex::build(dir.path()).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.collisions().len(), 1);

        let collision = &index.collisions()[0];
        assert!(collision.kept.ends_with("ana  lópez.pdf"));
        assert!(collision.replaced.ends_with("Ana Lopez.pdf"));
        assert_eq!(index.lookup(&tokenize("Ana Lopez")), Some(collision.kept.as_path()));
    }

    #[tokio::test]
    async fn missing_folder_builds_empty_index() {
        let dir = TempDir::new().unwrap();
        let index = AttachmentIndex::build(&dir.path().join("absent")).await.unwrap();
        assert!(index.is_empty());
    }
}
