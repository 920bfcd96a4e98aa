//! Project metadata and persistence.
//!
//! A project is the ordered image stack plus the masks authored on each
//! image. It is stored as `project.json` in the project directory and must
//! survive a save/load cycle unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::mask::Mask;

/// File name of the project record inside a project directory.
pub const PROJECT_FILE: &str = "project.json";

/// Top-level project file (`project.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Schema version.
    pub version: String,

    /// Human-readable project name.
    pub name: String,

    /// Creation timestamp (ISO 8601).
    pub created_at: String,

    /// Last modified timestamp (ISO 8601).
    pub modified_at: String,

    /// Input images in stack order.
    pub images: Vec<PathBuf>,

    /// Authored masks per image path, in authoring order.
    #[serde(default)]
    pub masks: BTreeMap<PathBuf, Vec<Mask>>,

    /// Directory the last batch of images was added from.
    #[serde(default)]
    pub last_opened_location: Option<PathBuf>,
}

/// The complete in-memory representation of a loaded project.
#[derive(Debug, Clone)]
pub struct LoadedProject {
    /// Filesystem path to the project directory.
    pub root: PathBuf,

    /// Project record.
    pub project: Project,
}

impl Project {
    /// Create an empty project.
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            version: "1.0".to_string(),
            name: name.into(),
            created_at: now.clone(),
            modified_at: now,
            images: vec![],
            masks: BTreeMap::new(),
            last_opened_location: None,
        }
    }

    /// Append images to the end of the stack.
    ///
    /// Paths already in the stack are skipped since masks are keyed by path.
    /// Returns the number of images actually added.
    pub fn add_images<I, P>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut added = 0;
        for path in paths {
            let path = path.into();
            if self.images.contains(&path) {
                tracing::warn!(path = %path.display(), "Image already in stack, skipping");
                continue;
            }
            if added == 0 {
                if let Some(parent) = path.parent() {
                    self.last_opened_location = Some(parent.to_path_buf());
                }
            }
            self.images.push(path);
            added += 1;
        }
        if added > 0 {
            self.touch();
        }
        added
    }

    /// Remove the images at `indices` along with their masks.
    ///
    /// Out-of-range indices are ignored. Returns removed paths in stack order.
    pub fn remove_images(&mut self, indices: &[usize]) -> Vec<PathBuf> {
        let mut sorted: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < self.images.len())
            .collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut removed = Vec::with_capacity(sorted.len());
        for &i in sorted.iter().rev() {
            let path = self.images.remove(i);
            self.masks.remove(&path);
            removed.push(path);
        }
        removed.reverse();
        if !removed.is_empty() {
            self.touch();
        }
        removed
    }

    /// Position of `path` in the stack.
    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.images.iter().position(|p| p == path)
    }

    /// Authored masks of `path` (empty if none).
    pub fn masks_for(&self, path: &Path) -> &[Mask] {
        self.masks.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append a mask to an image already in the stack.
    pub fn add_mask(&mut self, path: &Path, mask: Mask) -> Result<(), ProjectError> {
        if self.index_of(path).is_none() {
            return Err(ProjectError::ValidationError {
                message: format!("{} is not part of the stack", path.display()),
            });
        }
        self.masks.entry(path.to_path_buf()).or_default().push(mask);
        self.touch();
        Ok(())
    }

    /// Drop every mask authored on `path`. Returns how many were removed.
    pub fn clear_masks(&mut self, path: &Path) -> usize {
        let removed = self.masks.remove(path).map(|m| m.len()).unwrap_or(0);
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Mask lists aligned with `images` (one entry per image, in stack order).
    pub fn masks_in_stack_order(&self) -> Vec<Vec<Mask>> {
        self.images
            .iter()
            .map(|p| self.masks_for(p).to_vec())
            .collect()
    }

    /// Structural problems that would break a fusion run.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = vec![];

        for path in self.masks.keys() {
            if self.index_of(path).is_none() {
                errors.push(format!("Masks reference unknown image: {}", path.display()));
            }
        }

        for (path, masks) in &self.masks {
            for (i, mask) in masks.iter().enumerate() {
                if let Err(e) = mask.validate() {
                    errors.push(format!("Mask {i} on {} is malformed: {e}", path.display()));
                }
            }
        }

        errors
    }

    fn touch(&mut self) {
        self.modified_at = chrono::Utc::now().to_rfc3339();
    }
}

impl LoadedProject {
    /// Load a project from a directory.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let root = root.as_ref().to_path_buf();
        let project_path = root.join(PROJECT_FILE);

        let project_json =
            std::fs::read_to_string(&project_path).map_err(|e| ProjectError::IoError {
                path: project_path.clone(),
                source: e,
            })?;

        let project: Project =
            serde_json::from_str(&project_json).map_err(|e| ProjectError::ParseError {
                path: project_path,
                source: e,
            })?;

        Ok(Self { root, project })
    }

    /// Save the project record to disk.
    pub fn save(&self) -> Result<(), ProjectError> {
        std::fs::create_dir_all(&self.root).map_err(|e| ProjectError::IoError {
            path: self.root.clone(),
            source: e,
        })?;

        let project_path = self.root.join(PROJECT_FILE);
        let project_json =
            serde_json::to_string_pretty(&self.project).map_err(|e| ProjectError::ParseError {
                path: project_path.clone(),
                source: e,
            })?;
        std::fs::write(&project_path, project_json).map_err(|e| ProjectError::IoError {
            path: project_path,
            source: e,
        })?;

        Ok(())
    }

    /// Create a new project on disk with the standard directory structure.
    pub fn create(root: impl AsRef<Path>, name: impl Into<String>) -> Result<Self, ProjectError> {
        let root = root.as_ref().to_path_buf();

        let work = root.join("work");
        std::fs::create_dir_all(&work).map_err(|e| ProjectError::IoError {
            path: work.clone(),
            source: e,
        })?;

        let loaded = Self {
            root,
            project: Project::new(name),
        };
        loaded.save()?;
        Ok(loaded)
    }

    /// Directory for aligned, masked, and fused outputs.
    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    /// Resolve a stack path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Validate that all referenced source images exist.
    pub fn validate_sources(&self) -> Vec<String> {
        self.project
            .images
            .iter()
            .filter(|p| !self.resolve(p).exists())
            .map(|p| format!("Image source missing: {}", p.display()))
            .collect()
    }
}

/// Errors that can occur when working with projects.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid project: {message}")]
    ValidationError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskKind;
    use proptest::prelude::*;

    #[test]
    fn test_add_images_skips_duplicates_and_remembers_location() {
        let mut project = Project::new("Macro");
        let added = project.add_images(["/shots/a.jpg", "/shots/b.jpg", "/shots/a.jpg"]);
        assert_eq!(added, 2);
        assert_eq!(project.images.len(), 2);
        assert_eq!(project.last_opened_location, Some(PathBuf::from("/shots")));
    }

    #[test]
    fn test_remove_images_drops_their_masks() {
        let mut project = Project::new("Macro");
        project.add_images(["/s/a.jpg", "/s/b.jpg", "/s/c.jpg", "/s/d.jpg"]);
        project
            .add_mask(Path::new("/s/b.jpg"), Mask::rect(MaskKind::Include, 0.0, 0.0, 5.0, 5.0))
            .unwrap();

        let removed = project.remove_images(&[3, 1, 1, 99]);
        assert_eq!(
            removed,
            vec![PathBuf::from("/s/b.jpg"), PathBuf::from("/s/d.jpg")]
        );
        assert_eq!(
            project.images,
            vec![PathBuf::from("/s/a.jpg"), PathBuf::from("/s/c.jpg")]
        );
        assert!(project.masks.is_empty());
    }

    #[test]
    fn test_add_mask_requires_stack_member() {
        let mut project = Project::new("Macro");
        project.add_images(["/s/a.jpg"]);
        let err = project
            .add_mask(Path::new("/s/zzz.jpg"), Mask::include(vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0]))
            .unwrap_err();
        assert!(err.to_string().contains("not part of the stack"));
    }

    #[test]
    fn test_masks_in_stack_order_has_one_entry_per_image() {
        let mut project = Project::new("Macro");
        project.add_images(["/s/a.jpg", "/s/b.jpg", "/s/c.jpg"]);
        let include = Mask::rect(MaskKind::Include, 1.0, 1.0, 4.0, 4.0);
        project.add_mask(Path::new("/s/c.jpg"), include.clone()).unwrap();

        let lists = project.masks_in_stack_order();
        assert_eq!(lists.len(), 3);
        assert!(lists[0].is_empty());
        assert!(lists[1].is_empty());
        assert_eq!(lists[2], vec![include]);
    }

    #[test]
    fn test_validate_reports_malformed_masks() {
        let mut project = Project::new("Macro");
        project.add_images(["/s/a.jpg"]);
        project
            .add_mask(Path::new("/s/a.jpg"), Mask::exclude(vec![1.0, 2.0]))
            .unwrap();
        project
            .masks
            .insert(PathBuf::from("/s/ghost.jpg"), vec![]);

        let errors = project.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("unknown image")));
        assert!(errors.iter().any(|e| e.contains("malformed")));
    }

    #[test]
    fn test_loaded_project_create_and_load() {
        let dir = std::env::temp_dir().join("stackfuse_test_project");
        let _ = std::fs::remove_dir_all(&dir);

        let mut created = LoadedProject::create(&dir, "Integration Test").unwrap();
        created.project.add_images(["/s/a.jpg", "/s/b.jpg"]);
        created
            .project
            .add_mask(
                Path::new("/s/b.jpg"),
                Mask::from_points(MaskKind::Exclude, &[(0.5, 0.25), (10.0, 0.0), (3.0, 7.75)]),
            )
            .unwrap();
        created.save().unwrap();

        let loaded = LoadedProject::load(&dir).unwrap();
        assert_eq!(loaded.project, created.project);
        assert!(loaded.work_dir().exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validate_sources_reports_missing() {
        let dir = std::env::temp_dir().join("stackfuse_test_validate");
        let _ = std::fs::remove_dir_all(&dir);

        let mut loaded = LoadedProject::create(&dir, "Validate Test").unwrap();
        loaded.project.add_images(["missing.jpg"]);

        let errors = loaded.validate_sources();
        assert_eq!(errors, vec!["Image source missing: missing.jpg".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_legacy_file_without_masks_loads() {
        let json = r#"{
            "version": "1.0",
            "name": "Legacy",
            "created_at": "2024-01-01T00:00:00+00:00",
            "modified_at": "2024-01-01T00:00:00+00:00",
            "images": ["/s/a.jpg"]
        }"#;
        let parsed: Project = serde_json::from_str(json).unwrap();
        assert!(parsed.masks.is_empty());
        assert_eq!(parsed.last_opened_location, None);
    }

    fn arb_mask() -> impl Strategy<Value = Mask> {
        (
            prop::bool::ANY,
            prop::collection::vec(-4000i32..4000, 6..24),
        )
            .prop_map(|(include, coords)| {
                let kind = if include { MaskKind::Include } else { MaskKind::Exclude };
                let vertices = coords.iter().map(|&c| c as f64 * 0.25).collect();
                Mask::new(kind, vertices)
            })
    }

    proptest! {
        #[test]
        fn project_json_round_trips(
            names in prop::collection::vec("[a-z]{1,8}", 1..6),
            masks in prop::collection::vec(prop::collection::vec(arb_mask(), 0..4), 6),
        ) {
            let mut project = Project::new("Roundtrip");
            project.add_images(names.iter().map(|n| format!("/stack/{n}.tif")));
            let images = project.images.clone();
            for (path, list) in images.iter().zip(masks) {
                for mask in list {
                    project.add_mask(path, mask).unwrap();
                }
            }

            let json = serde_json::to_string_pretty(&project).unwrap();
            let parsed: Project = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(parsed, project);
        }
    }
}
