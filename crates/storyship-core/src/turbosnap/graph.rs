//! Module dependency graph extracted from the build's stats artifact.
//!
//! Edges are stored in reverse: for every module, the set of modules that
//! import it. Projecting a changed file onto stories is a breadth-first walk
//! over importers.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Stats {
    #[serde(default)]
    modules: Vec<StatsModule>,
}

#[derive(Debug, Deserialize)]
struct StatsModule {
    name: String,
    #[serde(default)]
    reasons: Vec<StatsReason>,
    /// Members of a concatenated module.
    #[serde(default)]
    modules: Vec<StatsModule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsReason {
    #[serde(default)]
    module_name: Option<String>,
}

/// Why a stats artifact could not be turned into a graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("stats file not found at {0}")]
    Missing(String),

    #[error("stats file could not be read: {0}")]
    Unreadable(String),

    #[error("stats file is malformed: {0}")]
    Malformed(String),
}

const STORY_EXTENSIONS: [&str; 9] = [
    "js", "jsx", "mjs", "cjs", "ts", "tsx", "mdx", "svelte", "vue",
];

/// `*.stories.<ext>` or `*.story.<ext>`.
fn is_story_file_name(name: &str) -> bool {
    let mut parts = file_name(name).rsplitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ext), Some(kind), Some(stem)) => {
            !stem.is_empty()
                && (kind == "stories" || kind == "story")
                && STORY_EXTENSIONS.contains(&ext)
        }
        _ => false,
    }
}

/// Strip webpack's ` + N modules` concatenation suffix.
fn strip_concatenated_suffix(name: &str) -> &str {
    if let Some((head, tail)) = name.rsplit_once(" + ") {
        let count = tail
            .strip_suffix(" modules")
            .or_else(|| tail.strip_suffix(" module"));
        if count.is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())) {
            return head;
        }
    }
    name
}

const STORIES_ENTRY_NAMES: [&str; 3] = [
    "generated-stories-entry.js",
    "generated-stories-entry.cjs",
    "storybook-stories.js",
];

const CONFIG_ENTRY_NAMES: [&str; 3] = [
    "generated-config-entry.js",
    "generated-config-entry.cjs",
    "storybook-config-entry.js",
];

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_stories_entry(name: &str) -> bool {
    STORIES_ENTRY_NAMES.contains(&file_name(name))
}

fn is_config_entry(name: &str) -> bool {
    CONFIG_ENTRY_NAMES.contains(&file_name(name))
}

fn is_in_config_dir(name: &str) -> bool {
    name.starts_with(".storybook/") || name.contains("/.storybook/")
}

/// Normalise a stats module name into a repository-relative path.
pub fn normalize_module_name(name: &str, base_dir: Option<&str>) -> String {
    let name = strip_concatenated_suffix(name);
    let name = name.split('?').next().unwrap_or_default();
    let name = name.strip_prefix("./").unwrap_or(name);

    match base_dir.map(|d| d.trim_matches('/')).filter(|d| !d.is_empty() && *d != ".") {
        Some(dir) if !name.starts_with('(') && !name.starts_with("node_modules/") => {
            format!("{dir}/{name}")
        }
        _ => name.to_string(),
    }
}

/// Result of projecting one changed file onto the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    /// Story files that transitively import the changed file.
    pub story_files: BTreeSet<String>,
    /// The change reaches the catalog configuration, affecting every story.
    pub reaches_config: bool,
}

/// Reverse dependency graph of the catalog build.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    importers: HashMap<String, BTreeSet<String>>,
    story_files: BTreeSet<String>,
    config_modules: HashSet<String>,
}

impl DependencyGraph {
    /// Load the graph from a stats file on disk.
    pub async fn load(path: &Path, base_dir: Option<&str>) -> Result<Self, GraphError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GraphError::Missing(path.display().to_string()),
            _ => GraphError::Unreadable(e.to_string()),
        })?;
        Self::from_stats_json(&raw, base_dir)
    }

    /// Build the graph from stats JSON.
    pub fn from_stats_json(raw: &str, base_dir: Option<&str>) -> Result<Self, GraphError> {
        let stats: Stats =
            serde_json::from_str(raw).map_err(|e| GraphError::Malformed(e.to_string()))?;
        if stats.modules.is_empty() {
            return Err(GraphError::Malformed("no modules listed".to_string()));
        }

        let mut graph = DependencyGraph::default();
        for module in &stats.modules {
            graph.add_module(module, &[], base_dir);
        }
        Ok(graph)
    }

    fn add_module(
        &mut self,
        module: &StatsModule,
        inherited: &[StatsReason],
        base_dir: Option<&str>,
    ) {
        let reasons = if module.reasons.is_empty() {
            inherited
        } else {
            &module.reasons
        };

        if module.modules.is_empty() {
            let name = normalize_module_name(&module.name, base_dir);
            let importers = self.importers.entry(name.clone()).or_default();
            let mut imported_by_stories_entry = false;
            let mut imported_by_config_entry = false;

            for importer in reasons.iter().filter_map(|r| r.module_name.as_deref()) {
                let importer = normalize_module_name(importer, base_dir);
                if importer == name {
                    continue;
                }
                imported_by_stories_entry |= is_stories_entry(&importer);
                imported_by_config_entry |= is_config_entry(&importer);
                importers.insert(importer);
            }

            if is_story_file_name(&name) || imported_by_stories_entry {
                self.story_files.insert(name.clone());
            }
            if is_in_config_dir(&name) || imported_by_config_entry || is_config_entry(&name) {
                self.config_modules.insert(name);
            }
        } else {
            for inner in &module.modules {
                self.add_module(inner, reasons, base_dir);
            }
        }
    }

    /// Whether `path` is a known module.
    pub fn contains(&self, path: &str) -> bool {
        self.importers.contains_key(path)
    }

    pub fn is_story_file(&self, path: &str) -> bool {
        self.story_files.contains(path)
    }

    pub fn story_files(&self) -> &BTreeSet<String> {
        &self.story_files
    }

    /// Story files that transitively depend on `changed`.
    pub fn project(&self, changed: &str) -> Projection {
        let mut projection = Projection::default();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        if is_in_config_dir(changed) {
            projection.reaches_config = true;
        }

        let Some((start, _)) = self.importers.get_key_value(changed) else {
            return projection;
        };
        queue.push_back(start.as_str());

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if self.story_files.contains(current) {
                projection.story_files.insert(current.to_string());
            }
            if self.config_modules.contains(current) {
                projection.reaches_config = true;
            }
            if let Some(importers) = self.importers.get(current) {
                queue.extend(
                    importers
                        .iter()
                        .map(String::as_str)
                        .filter(|i| !is_stories_entry(i) && !visited.contains(i)),
                );
            }
        }

        projection
    }
}
