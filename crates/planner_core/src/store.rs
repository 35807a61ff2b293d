use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::shapes_file::{parse_shapes, render_file, ShapesFileError};
use shape_planner_model::{RouteId, Shape};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no shape stored for route {0}")]
    NotFound(RouteId),
    #[error(transparent)]
    Parse(#[from] ShapesFileError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedShape {
    pub route_id: RouteId,
    pub file_name: String,
}

/// Flat-file store holding one `shape_{route_id}.txt` per route.
///
/// Saves replace the whole file through a rename, so a reader sees either the
/// previous or the new contents. Concurrent saves for the same route are not
/// coordinated: the last rename wins.
#[derive(Debug, Clone)]
pub struct ShapeStore {
    dir: PathBuf,
}

impl ShapeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(dir);
        std::fs::create_dir_all(&store.dir).map_err(|source| StoreError::Io {
            op: "create",
            path: store.dir.clone(),
            source,
        })?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(route_id: &RouteId) -> String {
        format!("shape_{}.txt", route_id)
    }

    pub fn path_for(&self, route_id: &RouteId) -> PathBuf {
        self.dir.join(Self::file_name(route_id))
    }

    /// Writes the header plus `rows` as the complete contents for `route_id`.
    pub fn save(&self, route_id: &RouteId, rows: &str) -> Result<SavedShape, StoreError> {
        let file_name = Self::file_name(route_id);
        let path = self.dir.join(&file_name);
        let temp_path = self.dir.join(format!(
            ".{}.{}-{}.tmp",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(source) = std::fs::write(&temp_path, render_file(rows)) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StoreError::Io {
                op: "write",
                path: temp_path,
                source,
            });
        }
        if let Err(source) = std::fs::rename(&temp_path, &path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StoreError::Io {
                op: "rename",
                path,
                source,
            });
        }
        tracing::info!("route saved to: {}", file_name);
        Ok(SavedShape {
            route_id: route_id.clone(),
            file_name,
        })
    }

    pub fn read_raw(&self, route_id: &RouteId) -> Result<String, StoreError> {
        let path = self.path_for(route_id);
        std::fs::read_to_string(&path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => StoreError::NotFound(route_id.clone()),
            _ => StoreError::Io {
                op: "read",
                path,
                source,
            },
        })
    }

    pub fn load(&self, route_id: &RouteId) -> Result<Vec<Shape>, StoreError> {
        let contents = self.read_raw(route_id)?;
        Ok(parse_shapes(contents.as_bytes())?)
    }
}
