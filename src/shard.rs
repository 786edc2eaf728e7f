//! C4: shard discovery — given a path, produce the ordered list of files
//! composing one logical volume (spec §4.4). Grounded on the Python
//! prototype's `nc3files.py::datafiles` and `nc3header.py`'s
//! `looksLikeNetCDF`/`basenameNetCDF`/`nc3file_from_directory`.

use crate::error::{IngestError, Result};
use std::path::{Path, PathBuf};

/// True if `name` looks like a NetCDF shard file: it ends in `_nc` or
/// `.nc`, optionally followed by `.bz2`.
pub fn looks_like_netcdf(name: &str) -> bool {
    let name = name.strip_suffix(".bz2").unwrap_or(name);
    name.ends_with("_nc") || name.ends_with(".nc")
}

/// Strips a trailing `.bz2` and then a trailing `.nc`/`_nc` suffix from
/// `name`, the way `basenameNetCDF` does.
pub fn basename_netcdf(name: &str) -> String {
    let without_bz2 = name.strip_suffix(".bz2").unwrap_or(name);
    let without_nc = without_bz2
        .strip_suffix(".nc")
        .or_else(|| without_bz2.strip_suffix("_nc"))
        .unwrap_or(without_bz2);
    without_nc.to_string()
}

/// Given a path `P`: if it is a regular file, the result is `[P]`. If it
/// is a directory, recursively walks it and returns the lexicographically
/// sorted list of full paths whose basename matches `looks_like_netcdf`
/// (spec §4.4). Fails if the resulting list would be empty.
pub fn discover_shards(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let trimmed: PathBuf = {
        let s = path.to_string_lossy();
        let s = s.trim_end_matches('/');
        PathBuf::from(s)
    };

    let entries = if trimmed.is_dir() {
        let mut found = Vec::new();
        walk(&trimmed, &mut found)?;
        found.sort();
        found
    } else {
        vec![trimmed.clone()]
    };

    if entries.is_empty() {
        return Err(IngestError::NoShards {
            path: trimmed.display().to_string(),
        });
    }
    Ok(entries)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, out)?;
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if looks_like_netcdf(name) {
                out.push(path);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn looks_like_netcdf_matches_suffixes() {
        assert!(looks_like_netcdf("volume.nc"));
        assert!(looks_like_netcdf("volume_nc"));
        assert!(looks_like_netcdf("volume.nc.bz2"));
        assert!(!looks_like_netcdf("volume.txt"));
    }

    #[test]
    fn basename_strips_all_suffix_forms() {
        assert_eq!(basename_netcdf("tomo_data.nc.bz2"), "tomo_data");
        assert_eq!(basename_netcdf("tomo_data_nc"), "tomo_data");
        assert_eq!(basename_netcdf("tomo_data"), "tomo_data");
    }

    #[test]
    fn single_file_path_returns_itself() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("one.nc");
        fs::write(&file_path, b"data").unwrap();
        let shards = discover_shards(&file_path).unwrap();
        assert_eq!(shards, vec![file_path]);
    }

    #[test]
    fn directory_is_walked_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.nc"), b"1").unwrap();
        fs::write(dir.path().join("a.nc"), b"2").unwrap();
        fs::write(dir.path().join("ignore.txt"), b"3").unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("c.nc.bz2"), b"4").unwrap();

        let shards = discover_shards(dir.path()).unwrap();
        assert_eq!(shards.len(), 3);
        assert!(shards[0] < shards[1]);
        assert!(shards[1] < shards[2]);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_shards(dir.path()).unwrap_err();
        assert!(matches!(err, IngestError::NoShards { .. }));
    }
}
