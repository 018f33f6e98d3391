// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Clip lookup on disk. Every switch has a folder named after its number under the
//! library root, and any audio file in that folder is a candidate for the switch.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use rand::seq::SliceRandom;
use tracing::warn;

use crate::switch::Switch;

/// File extensions recognized as audio clips.
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg"];

/// A reference to an audio clip belonging to a switch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClipRef {
    switch: Switch,
    path: PathBuf,
}

impl ClipRef {
    pub fn new(switch: Switch, path: PathBuf) -> ClipRef {
        ClipRef { switch, path }
    }

    /// The switch whose folder holds this clip.
    pub fn switch(&self) -> Switch {
        self.switch
    }

    /// The full path to the clip.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file name of the clip, or the full path if it has none.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl fmt::Display for ClipRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.switch, self.name())
    }
}

/// Resolves switches to candidate clips. Holds no state beyond the root folder.
#[derive(Clone, Debug)]
pub struct ClipLibrary {
    root: PathBuf,
}

impl ClipLibrary {
    pub fn new(root: impl Into<PathBuf>) -> ClipLibrary {
        ClipLibrary { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The folder that holds the clips for the given switch.
    pub fn folder(&self, switch: Switch) -> PathBuf {
        self.root.join(switch.number().to_string())
    }

    /// Lists the clips for the given switch. A missing or empty folder yields no
    /// candidates rather than an error.
    pub fn list_candidates(&self, switch: Switch) -> Vec<ClipRef> {
        let folder = self.folder(switch);
        match Self::read_folder(&folder) {
            Ok(paths) => paths
                .into_iter()
                .map(|path| ClipRef::new(switch, path))
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(
                    folder = ?folder,
                    err = e.to_string(),
                    "Unable to read clip folder"
                );
                Vec::new()
            }
        }
    }

    /// Lists the clips for every switch, in switch order.
    pub fn list_all(&self) -> Vec<ClipRef> {
        Switch::all()
            .flat_map(|switch| self.list_candidates(switch))
            .collect()
    }

    fn read_folder(folder: &Path) -> Result<Vec<PathBuf>, io::Error> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(folder)? {
            let path = entry?.path();
            if path.is_file() && is_audio_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Returns true if the path has one of the recognized audio extensions.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Picks a clip uniformly at random. Returns None if there are no candidates.
pub fn pick_random(candidates: &[ClipRef]) -> Option<&ClipRef> {
    candidates.choose(&mut rand::thread_rng())
}
