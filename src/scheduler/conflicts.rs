use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use super::graph::{Task, TaskId};
use super::SchedulerConfig;

/// Best-effort file-conflict detection over free-form task descriptions.
///
/// This is a heuristic safety net, not a proof of isolation: a task whose
/// touched files are not mentioned in its description produces a false
/// negative, and two such tasks can still be co-scheduled.
pub struct ConflictDetector {
    marker_pattern: Option<Regex>,
    path_pattern: Option<Regex>,
    extension_pattern: Option<Regex>,
}

impl ConflictDetector {
    pub fn new(config: &SchedulerConfig) -> Self {
        // Config fragments are user-supplied literals; escape them so a
        // metacharacter cannot change or break the patterns.
        let markers = escape_alternation(&config.file_markers);
        let marker_pattern = compile(&format!(
            r"(?i)\b(?:{markers})\s*:\s*([A-Za-z0-9_@./\-]+)"
        ));
        let path_pattern = compile(r"\b([A-Za-z0-9_.\-]+(?:/[A-Za-z0-9_.\-]+)+)\b");
        let extensions = escape_alternation(&config.source_extensions);
        let extension_pattern = compile(&format!(
            r"\b([A-Za-z0-9_\-]+\.(?:{extensions}))\b"
        ));
        Self {
            marker_pattern,
            path_pattern,
            extension_pattern,
        }
    }

    /// Union of a task's explicit file set with every path-like token the
    /// description yields: `file:`/`path:`/`location:` markers, slash-joined
    /// tokens, and bare names with a known source extension.
    pub fn extract_files(&self, task: &Task) -> BTreeSet<String> {
        let mut files = task.files.clone();
        if let Some(re) = &self.marker_pattern {
            for capture in re.captures_iter(&task.description) {
                if let Some(m) = capture.get(1) {
                    files.insert(trim_token(m.as_str()));
                }
            }
        }
        if let Some(re) = &self.path_pattern {
            for capture in re.captures_iter(&task.description) {
                if let Some(m) = capture.get(1) {
                    files.insert(trim_token(m.as_str()));
                }
            }
        }
        if let Some(re) = &self.extension_pattern {
            for capture in re.captures_iter(&task.description) {
                if let Some(m) = capture.get(1) {
                    files.insert(trim_token(m.as_str()));
                }
            }
        }
        files
    }

    /// Split one parallel wave into conflict-free sub-groups via greedy graph
    /// coloring: tasks are processed in their original order and take the
    /// lowest color unused by any conflicting, already-colored neighbor.
    /// Co-colored tasks are guaranteed disjoint under the extracted file sets.
    pub fn partition(
        &self,
        wave: &[TaskId],
        files: &HashMap<TaskId, BTreeSet<String>>,
    ) -> Vec<Vec<TaskId>> {
        if wave.len() <= 1 {
            return vec![wave.to_vec()];
        }

        let empty = BTreeSet::new();
        let mut colors: Vec<usize> = Vec::with_capacity(wave.len());
        for (i, id) in wave.iter().enumerate() {
            let mine = files.get(id).unwrap_or(&empty);
            let taken: BTreeSet<usize> = wave[..i]
                .iter()
                .zip(colors.iter())
                .filter(|(other, _)| {
                    let theirs = files.get(*other).unwrap_or(&empty);
                    !mine.is_disjoint(theirs)
                })
                .map(|(_, color)| *color)
                .collect();
            let color = (0..).find(|c| !taken.contains(c)).unwrap_or(0);
            colors.push(color);
        }

        let color_count = colors.iter().copied().max().unwrap_or(0) + 1;
        let mut groups: Vec<Vec<TaskId>> = vec![Vec::new(); color_count];
        for (id, color) in wave.iter().zip(colors.iter()) {
            groups[*color].push(id.clone());
        }
        groups
    }
}

fn escape_alternation(fragments: &[String]) -> String {
    fragments.iter().map(|f| regex::escape(f)).collect::<Vec<_>>().join("|")
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(error) => {
            warn!(%pattern, %error, "skipping invalid file-extraction pattern");
            None
        }
    }
}

fn trim_token(token: &str) -> String {
    token.trim_matches(|c: char| c == '.' || c == ',' || c == ';').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ConflictDetector {
        ConflictDetector::new(&SchedulerConfig::default())
    }

    fn task_with(description: &str) -> Task {
        Task::new("t", description, vec![], 2)
    }

    #[test]
    fn extracts_marker_paths_and_extensions() {
        let files = detector().extract_files(&task_with(
            "update file: src/auth/login.rs and touch config.toml plus docs/setup.md",
        ));
        assert!(files.contains("src/auth/login.rs"));
        assert!(files.contains("config.toml"));
        assert!(files.contains("docs/setup.md"));
    }

    #[test]
    fn plain_prose_extracts_nothing() {
        let files = detector().extract_files(&task_with("discuss the release plan with the team"));
        assert!(files.is_empty());
    }

    #[test]
    fn metacharacters_in_config_fragments_are_treated_literally() {
        let mut config = SchedulerConfig::default();
        config.file_markers.push("path*".to_string());
        config.source_extensions.push("c++".to_string());

        let detector = ConflictDetector::new(&config);
        let files = detector.extract_files(&task_with("update path*: targets.bzl"));
        assert!(files.contains("targets.bzl"));

        // An unescaped "c++" fails to compile and would disable extension
        // extraction entirely; the defaults must keep working alongside it.
        let files = detector.extract_files(&task_with("edit file: src/lib.rs, then config.toml"));
        assert!(files.contains("src/lib.rs"));
        assert!(files.contains("config.toml"));
    }

    #[test]
    fn coloring_separates_overlapping_tasks() {
        let detector = detector();
        let wave = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut files = HashMap::new();
        files.insert("a".to_string(), ["src/main.rs".to_string()].into_iter().collect());
        files.insert("b".to_string(), ["src/main.rs".to_string()].into_iter().collect());
        files.insert("c".to_string(), ["src/lib.rs".to_string()].into_iter().collect());

        let groups = detector.partition(&wave, &files);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec!["a".to_string(), "c".to_string()]);
        assert_eq!(groups[1], vec!["b".to_string()]);
    }

    #[test]
    fn disjoint_tasks_stay_together() {
        let detector = detector();
        let wave = vec!["a".to_string(), "b".to_string()];
        let mut files = HashMap::new();
        files.insert("a".to_string(), ["x.rs".to_string()].into_iter().collect());
        files.insert("b".to_string(), ["y.rs".to_string()].into_iter().collect());

        let groups = detector.partition(&wave, &files);
        assert_eq!(groups, vec![wave]);
    }
}
