// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::{Path, PathBuf};

/// Returns the segment file path: `base/<name>.diskqueue.NNNNNN.dat`.
pub fn segment_file_path<P: AsRef<Path>>(base: P, name: &str, segment: u64) -> PathBuf {
    base.as_ref()
        .join(format!("{name}.diskqueue.{segment:06}.dat"))
}

/// Returns the metadata file path: `base/<name>.diskqueue.meta.dat`.
pub fn metadata_file_path<P: AsRef<Path>>(base: P, name: &str) -> PathBuf {
    base.as_ref().join(format!("{name}.diskqueue.meta.dat"))
}

/// Path a corrupt segment is moved to so it is skipped but kept for
/// inspection.
pub fn bad_file_path(segment_path: &Path) -> PathBuf {
    let mut name = segment_path.as_os_str().to_owned();
    name.push(".bad");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_file_path() {
        let path = segment_file_path("/base", "stream_local_save", 3);
        assert_eq!(
            path,
            PathBuf::from("/base/stream_local_save.diskqueue.000003.dat")
        );
    }

    #[test]
    fn test_metadata_file_path() {
        let path = metadata_file_path("/base", "backup_local_save");
        assert_eq!(
            path,
            PathBuf::from("/base/backup_local_save.diskqueue.meta.dat")
        );
    }

    #[test]
    fn test_bad_file_path() {
        let segment = segment_file_path("/base", "q", 0);
        assert_eq!(
            bad_file_path(&segment),
            PathBuf::from("/base/q.diskqueue.000000.dat.bad")
        );
    }
}
