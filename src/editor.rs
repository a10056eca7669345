//! Editor access
//!
//! The host editor is an opaque capability: something that can hand back the
//! current solution text and the location it is showing. `EditorAccessor`
//! binds a host to the problem identifier parsed from that location. Hosts can
//! replace their editor on navigation, so callers re-resolve the accessor
//! after every navigation instead of holding on to it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;
use url::Url;

/// Capability exposed by whatever is hosting the code editor.
pub trait EditorHost: Send + Sync {
    /// Current editor text, or `None` if no editor instance can be found.
    fn text(&self) -> Option<String>;
    /// Current navigation location (URL or bare problem slug).
    fn location(&self) -> Option<String>;
}

/// Editor content captured at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditSnapshot {
    pub code: String,
    pub problem_id: String,
    pub captured_at: DateTime<Utc>,
}

/// Parse a problem identifier out of a navigation location.
///
/// Accepts `/problems/<slug>/...` URLs on any host, or a bare slug such as
/// `two-sum`.
pub fn parse_problem_id(location: &str) -> Option<String> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(location) {
        let mut segments = url.path_segments()?;
        while let Some(segment) = segments.next() {
            if segment == "problems" {
                return segments.next().and_then(normalize_slug);
            }
        }
        return None;
    }

    // Relative path like "/problems/two-sum/description/"
    if location.contains('/') {
        let mut parts = location.split('/').filter(|p| !p.is_empty());
        while let Some(part) = parts.next() {
            if part == "problems" {
                return parts.next().and_then(normalize_slug);
            }
        }
        return None;
    }

    normalize_slug(location)
}

fn normalize_slug(raw: &str) -> Option<String> {
    let slug = raw.trim().to_lowercase();
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(slug)
}

/// An editor host bound to the problem it was resolved for.
#[derive(Clone)]
pub struct EditorAccessor {
    host: Arc<dyn EditorHost>,
    problem_id: String,
}

impl EditorAccessor {
    /// Bind to the host's current location. `None` if the host is not showing
    /// a problem.
    pub fn resolve(host: Arc<dyn EditorHost>) -> Option<Self> {
        let location = host.location()?;
        let Some(problem_id) = parse_problem_id(&location) else {
            debug!(%location, "no problem id in location");
            return None;
        };
        Some(Self { host, problem_id })
    }

    pub fn problem_id(&self) -> &str {
        &self.problem_id
    }

    /// Capture the current editor text. `None` when the editor is gone.
    pub fn current_snapshot(&self) -> Option<EditSnapshot> {
        let Some(code) = self.host.text() else {
            debug!(problem = %self.problem_id, "editor text unavailable");
            return None;
        };
        Some(EditSnapshot {
            code,
            problem_id: self.problem_id.clone(),
            captured_at: Utc::now(),
        })
    }
}

/// A solution file on disk acting as the editor.
///
/// The location is held separately so a CLI session can "navigate" to a
/// different problem while editing the same file.
pub struct FileEditor {
    path: PathBuf,
    location: RwLock<String>,
}

impl FileEditor {
    pub fn new(path: impl Into<PathBuf>, location: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            location: RwLock::new(location.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point the editor at a new location.
    pub fn navigate(&self, location: &str) {
        let mut guard = match self.location.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = location.to_string();
    }
}

impl EditorHost for FileEditor {
    fn text(&self) -> Option<String> {
        fs::read_to_string(&self.path).ok()
    }

    fn location(&self) -> Option<String> {
        let guard = match self.location.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(guard.clone())
    }
}
