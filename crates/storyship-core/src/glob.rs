//! Path glob matching for `untraced`, `externals` and branch policies.
//!
//! Patterns use `glob::Pattern` syntax with `/` as a hard separator: `*` and
//! `?` stay within one segment, `**` crosses segments and `[...]` is a
//! character class. `{a,b}` alternatives are expanded before compiling.
//! Matches are anchored.

use glob::{MatchOptions, Pattern};

use crate::domain::error::{PipelineError, Result};

const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A compiled set of globs; matches when any glob matches.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    patterns: Vec<Pattern>,
}

impl GlobSet {
    /// Compile every glob. An invalid glob is a configuration error.
    pub fn new<I, S>(globs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns = Vec::new();
        for glob in globs {
            let glob = glob.as_ref();
            let trimmed = glob.strip_prefix("./").unwrap_or(glob);
            for alternative in expand_braces(trimmed).map_err(|reason| invalid(glob, reason))? {
                let pattern =
                    Pattern::new(&alternative).map_err(|e| invalid(glob, e.to_string()))?;
                patterns.push(pattern);
            }
        }
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_match(&self, path: &str) -> bool {
        let path = path.strip_prefix("./").unwrap_or(path);
        self.patterns
            .iter()
            .any(|p| p.matches_with(path, PATH_MATCH))
    }
}

fn invalid(glob: &str, reason: impl Into<String>) -> PipelineError {
    PipelineError::InvalidGlob {
        glob: glob.to_string(),
        reason: reason.into(),
    }
}

/// Expand the first `{a,b}` group, recursively, into plain patterns.
fn expand_braces(glob: &str) -> std::result::Result<Vec<String>, String> {
    let Some(open) = glob.find('{') else {
        if glob.contains('}') {
            return Err("unmatched '}'".to_string());
        }
        return Ok(vec![glob.to_string()]);
    };

    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, c) in glob[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(open + i),
            _ => {}
        }
    }
    let close = close.ok_or_else(|| "unmatched '{'".to_string())?;

    let (prefix, suffix) = (&glob[..open], &glob[close + 1..]);
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    let mut expanded = Vec::new();
    for window in bounds.windows(2) {
        let choice = &glob[window[0] + 1..window[1]];
        expanded.extend(expand_braces(&format!("{prefix}{choice}{suffix}"))?);
    }
    Ok(expanded)
}
