//! C12: the single-dataset driver — sequences shard discovery, volume
//! selection, z-slab streaming, histogram and slice accumulation, and
//! image encoding into the slice set for one dataset, and separately
//! drives header decoding into a provenance document (spec §4.12).
//! Grounded on the Python prototype's `make_slices.py::slices` and
//! `history.py`'s `__main__` driver.

use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::histogram::Histogram;
use crate::history::History;
use crate::image;
use crate::nc3::cache::HeaderCache;
use crate::nc3::decoder::decode_header;
use crate::nc3::types::Header;
use crate::shard::discover_shards;
use crate::slab::ZSlabStream;
use crate::slice::{default_slice_set, slice_basename, PlannedSlice, SUPPRESSION_DELTA};
use crate::volume::{find_volume_variable, VolumeDescriptor};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// What should happen to one planned slice output, based on whether its
/// file already exists and whether `--replace` was given (spec §4.12's
/// ADD/REPLACE/SKIP resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Replace,
    Skip,
}

fn resolve_action(file_name: &str, existing: &[String], replace: bool) -> Action {
    if existing.iter().any(|e| e == file_name) {
        if replace {
            Action::Replace
        } else {
            Action::Skip
        }
    } else {
        Action::Add
    }
}

/// Expands one planned slice's base file name into the full-size output
/// plus one thumbnail variant per requested size, in the caller-supplied
/// size order (spec §8 testable property #3: axis, then thumbnail size).
/// Thumbnail names are prefixed `__WxH__` (spec §4.9).
fn output_plan(file_name: &str, sizes: &[(u32, u32)]) -> Vec<(String, Option<(u32, u32)>)> {
    let mut plan = vec![(file_name.to_string(), None)];
    for &(w, h) in sizes {
        plan.push((format!("__{w}x{h}__{file_name}"), Some((w, h))));
    }
    plan
}

/// One finished slice output: its file name, PNG bytes, and the action
/// that produced it.
pub struct SliceOutput {
    pub file_name: String,
    pub content: Vec<u8>,
    pub action: Action,
}

/// Reads the header for `shard`, going through the persistent header
/// cache unless caching is disabled in `config`.
fn read_header(shard: &Path, config: &Config) -> Result<Header> {
    let path_str = shard.display().to_string();
    let cache = HeaderCache::open(shard, config.cache.clone())?;
    decode_header(cache, &path_str)
}

/// Confirms that `shard`'s header yields the same volume variable (name,
/// size, origin, dtype) as `expected` — every shard of a multi-shard
/// volume must agree (spec §3's invariant), otherwise the stream is
/// fatal for the whole volume.
fn check_volume_matches(shard: &Path, header: &Header, expected: &VolumeDescriptor) -> Result<()> {
    match find_volume_variable(header) {
        Some(ref found) if found == expected => Ok(()),
        _ => Err(IngestError::VolumeMismatch {
            path: shard.display().to_string(),
        }),
    }
}

/// Produces the slice image set for the dataset at `path`, following the
/// prototype's `slices()` generator: discover shards, find the volume
/// variable, plan the default slice set, stream every shard's z-planes
/// once into both the histogram and the slice buffers, then encode.
///
/// `existing` names files already present at the destination (driving
/// ADD/REPLACE/SKIP resolution); `mock` skips all data reads and instead
/// emits placeholder images, for fast pipeline smoke-tests.
pub fn make_slices(
    path: &Path,
    config: &Config,
    existing: &[String],
    mock: bool,
) -> Result<Vec<SliceOutput>> {
    let shards = discover_shards(path)?;
    let basename = slice_basename(&path.display().to_string());

    info!("looking for a volume variable in {}", shards[0].display());
    let first_header = read_header(&shards[0], config)?;
    let descriptor = match find_volume_variable(&first_header) {
        Some(d) => d,
        None => {
            info!("no appropriate volume data found");
            return Ok(Vec::new());
        }
    };

    let planned = default_slice_set(&descriptor, SUPPRESSION_DELTA, &basename);
    let planned: Vec<PlannedSlice> = planned
        .into_iter()
        .filter(|p| resolve_action(&p.file_name, existing, config.replace) != Action::Skip)
        .collect();

    if planned.is_empty() {
        info!("no slices are to be made");
        return Ok(Vec::new());
    }

    if mock {
        let mut outputs = Vec::new();
        for p in &planned {
            for (name, size) in output_plan(&p.file_name, &config.thumbnail_sizes) {
                let (w, h) = size.unwrap_or((256, 256));
                outputs.push(SliceOutput {
                    action: resolve_action(&name, existing, config.replace),
                    file_name: name,
                    content: image::make_dummy(w, h)?,
                });
            }
        }
        return Ok(outputs);
    }

    if config.dry_run {
        let mut outputs = Vec::new();
        for p in &planned {
            for (name, _size) in output_plan(&p.file_name, &config.thumbnail_sizes) {
                outputs.push(SliceOutput {
                    action: resolve_action(&name, existing, config.replace),
                    file_name: name,
                    content: Vec::new(),
                });
            }
        }
        return Ok(outputs);
    }

    let mask_value = descriptor.dtype.mask_value();
    let mut histogram = if matches!(descriptor.dtype, crate::volume::Dtype::F32) {
        info!("determining the data range");
        let (minval, maxval) = data_range(&shards, config, &descriptor)?;
        Histogram::new_float(mask_value, minval, maxval)
    } else {
        Histogram::new_integer(mask_value)
    };

    let mut planned = planned;
    let progress = ProgressBar::new(shards.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} shards processed").unwrap(),
    );

    for shard in &shards {
        progress.inc(1);
        info!("processing {}", shard.display());
        let header = read_header(shard, config)?;
        check_volume_matches(shard, &header, &descriptor)?;
        let mut stream = ZSlabStream::open(shard, &header, &descriptor)?;
        loop {
            let next_z = stream.next_z();
            match stream.next_plane()? {
                Some(plane) => {
                    histogram.update(&plane.data);
                    for p in &mut planned {
                        p.slice.update(descriptor.size, &plane.data, plane.z);
                    }
                }
                None => {
                    if let Some(z) = next_z {
                        warn!("insufficient data at z = {z}");
                    }
                    break;
                }
            }
        }
    }
    progress.finish_and_clear();

    info!("analysing the histogram");
    let (lo, hi) = if basename.starts_with("tom") {
        (histogram.bottom_percentile(0.1), histogram.top_percentile(0.1))
    } else {
        (0.0, (histogram.counts_len().saturating_sub(1)) as f64)
    };
    let mode = image::select_mode(descriptor.dtype, hi);

    let mut outputs = Vec::new();
    for p in &planned {
        for (name, thumb_size) in output_plan(&p.file_name, &config.thumbnail_sizes) {
            let action = resolve_action(&name, existing, config.replace);
            let content = image::make_image(
                &p.slice.content,
                p.slice.dims.0 as u32,
                p.slice.dims.1 as u32,
                lo,
                hi,
                mask_value,
                mode,
                thumb_size,
            )?;
            outputs.push(SliceOutput {
                file_name: name,
                content,
                action,
            });
        }
    }
    Ok(outputs)
}

fn data_range(shards: &[PathBuf], config: &Config, descriptor: &VolumeDescriptor) -> Result<(f64, f64)> {
    let mut minval = f64::INFINITY;
    let mut maxval = f64::NEG_INFINITY;
    for shard in shards {
        let header = read_header(shard, config)?;
        check_volume_matches(shard, &header, descriptor)?;
        let mut stream = ZSlabStream::open(shard, &header, descriptor)?;
        while let Some(plane) = stream.next_plane()? {
            for &v in &plane.data {
                if v < minval {
                    minval = v;
                }
                if v > maxval {
                    maxval = v;
                }
            }
        }
    }
    Ok((minval, maxval))
}

/// Builds the provenance document for the dataset at `path`: decodes the
/// first shard's header and assembles its `history_*` attributes into a
/// `History` (spec §4.12's provenance leg).
pub fn make_provenance(path: &Path, config: &Config) -> Result<String> {
    let shards = discover_shards(path)?;
    let header = read_header(&shards[0], config)?;
    let metadata = std::fs::metadata(&shards[0])?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| chrono::DateTime::from_timestamp(d.as_secs() as i64, 0).unwrap().naive_utc())
        .unwrap_or_default();

    let name = shards[0].file_name().and_then(|n| n.to_str());
    let history = History::build(&header, name, mtime, &header.fingerprint);
    history.to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn be_i32(v: i32) -> [u8; 4] {
        v.to_be_bytes()
    }

    fn pad_to_4(buf: &mut Vec<u8>, len: usize) {
        let pad = (4 - len % 4) % 4;
        buf.extend(std::iter::repeat(0u8).take(pad));
    }

    fn write_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&be_i32(s.len() as i32));
        buf.extend_from_slice(s.as_bytes());
        pad_to_4(buf, s.len());
    }

    /// Builds a single-shard NetCDF-3 file with one 16x16x16 SHORT volume
    /// variable named "tomo" and returns its bytes. 16 keeps every axis
    /// above the suppression delta so all three slices are produced.
    fn build_volume_bytes(data_start: i32, samples: &[i16]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"CDF\x01");
        buf.extend_from_slice(&be_i32(0)); // num_records

        // dimensions: z=16, y=16, x=16
        buf.extend_from_slice(&be_i32(10));
        buf.extend_from_slice(&be_i32(3));
        for (name, value) in [("z", 16), ("y", 16), ("x", 16)] {
            write_string(&mut buf, name);
            buf.extend_from_slice(&be_i32(value));
        }

        // no global attributes
        buf.extend_from_slice(&be_i32(0));
        buf.extend_from_slice(&be_i32(0));

        // one variable: "tomo", dims [0, 1, 2], no attrs, SHORT
        buf.extend_from_slice(&be_i32(11));
        buf.extend_from_slice(&be_i32(1));
        write_string(&mut buf, "tomo");
        buf.extend_from_slice(&be_i32(3));
        for idx in [0, 1, 2] {
            buf.extend_from_slice(&be_i32(idx));
        }
        buf.extend_from_slice(&be_i32(0)); // attr tag
        buf.extend_from_slice(&be_i32(0)); // attr count
        buf.extend_from_slice(&be_i32(3)); // NC_SHORT
        let data_size = (samples.len() * 2) as i32;
        buf.extend_from_slice(&be_i32(data_size));
        buf.extend_from_slice(&be_i32(data_start));

        while (buf.len() as i32) < data_start {
            buf.push(0);
        }
        for s in samples {
            buf.extend_from_slice(&s.to_be_bytes());
        }
        buf
    }

    fn write_dataset(dir: &std::path::Path) -> PathBuf {
        let header_len = build_volume_bytes(0, &[]).len() as i32;
        let samples: Vec<i16> = (0..16 * 16 * 16).map(|v| (v % 4096) as i16).collect();
        let bytes = build_volume_bytes(header_len, &samples);
        let path = dir.join("tomo_vol.nc");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(&bytes).unwrap();
        path
    }

    #[test]
    fn make_slices_produces_three_axis_slices_for_a_cubic_volume() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dataset(dir.path());
        let config = Config::default();

        let outputs = make_slices(&path, &config, &[], false).unwrap();
        assert_eq!(outputs.len(), 3);
        for output in &outputs {
            assert_eq!(output.action, Action::Add);
            assert_eq!(&output.content[..4], &[0x89, b'P', b'N', b'G']);
        }
    }

    #[test]
    fn make_slices_emits_a_thumbnail_per_requested_size_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dataset(dir.path());
        let mut config = Config::default();
        config.thumbnail_sizes = vec![(64, 64), (32, 32)];

        let outputs = make_slices(&path, &config, &[], false).unwrap();
        // 3 axes * (1 full-size + 2 thumbnails) = 9 outputs.
        assert_eq!(outputs.len(), 9);
        assert_eq!(outputs[0].file_name, "sliceX7_tom_vol.png");
        assert_eq!(outputs[1].file_name, "__64x64__sliceX7_tom_vol.png");
        assert_eq!(outputs[2].file_name, "__32x32__sliceX7_tom_vol.png");
        for output in &outputs {
            assert_eq!(&output.content[..4], &[0x89, b'P', b'N', b'G']);
        }
    }

    #[test]
    fn make_slices_with_mock_flag_skips_real_data_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dataset(dir.path());
        let config = Config::default();

        let outputs = make_slices(&path, &config, &[], true).unwrap();
        assert_eq!(outputs.len(), 3);
        assert!(outputs.iter().all(|o| !o.content.is_empty()));
    }

    #[test]
    fn existing_outputs_are_skipped_without_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dataset(dir.path());
        let config = Config::default();

        let first = make_slices(&path, &config, &[], true).unwrap();
        let existing: Vec<String> = first.iter().map(|o| o.file_name.clone()).collect();
        let second = make_slices(&path, &config, &existing, true).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn make_provenance_emits_parseable_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dataset(dir.path());
        let config = Config::default();

        let json = make_provenance(&path, &config).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.is_array());
    }
}
