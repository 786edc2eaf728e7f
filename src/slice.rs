//! C8: orthogonal slice assembly — three centre slices through a volume
//! (one per axis), each filled in as z-planes stream past, with the
//! suppression rule for thin volumes and the output naming law (spec
//! §4.8). Grounded on the Python prototype's `make_slices.py::Slice` and
//! `default_slice_set`.

use crate::shard::basename_netcdf;
use crate::volume::VolumeDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }
}

/// A single 2-D slice being assembled through the centre of the volume
/// along `axis`, at logical position `pos` in the volume's own (x, y, z)
/// coordinate space.
pub struct Slice {
    pub axis: Axis,
    pub pos: i64,
    /// (rows, cols) of this slice's content, matching the prototype's
    /// per-axis `slice_dims` table.
    pub dims: (i64, i64),
    /// Row-major content, `dims.0 * dims.1` entries.
    pub content: Vec<f64>,
}

impl Slice {
    pub fn new(size: (i64, i64, i64), axis: Axis, pos: i64) -> Slice {
        let (x, y, z) = size;
        let dims = match axis {
            Axis::X => (z, y),
            Axis::Y => (z, x),
            Axis::Z => (y, x),
        };
        Slice {
            axis,
            pos,
            dims,
            content: vec![0.0; (dims.0 * dims.1) as usize],
        }
    }

    /// Folds in one z-plane (`y * x` row-major samples, at `z_pos`),
    /// copying out the row/column/plane relevant to this slice's axis.
    pub fn update(&mut self, size: (i64, i64, i64), z_plane: &[f64], z_pos: i64) {
        let (x, y, _z) = size;
        let cols = self.dims.1;
        match self.axis {
            Axis::X => {
                // content[z_pos, :] = z_plane[:, pos]
                let row_start = (z_pos * cols) as usize;
                for row in 0..y {
                    let v = z_plane[(row * x + self.pos) as usize];
                    self.content[row_start + row as usize] = v;
                }
            }
            Axis::Y => {
                // content[z_pos, :] = z_plane[pos, :]
                let row_start = (z_pos * cols) as usize;
                let plane_row_start = (self.pos * x) as usize;
                self.content[row_start..row_start + x as usize]
                    .copy_from_slice(&z_plane[plane_row_start..plane_row_start + x as usize]);
            }
            Axis::Z => {
                if z_pos == self.pos {
                    self.content.copy_from_slice(z_plane);
                }
            }
        }
    }
}

/// The minimum extent (in either direction) a slice's dimensions must
/// have for it to be produced (spec §4.8 suppression rule).
pub const SUPPRESSION_DELTA: i64 = 10;

/// One planned output slice: the (empty, to-be-filled) `Slice` paired
/// with its PNG file name.
pub struct PlannedSlice {
    pub slice: Slice,
    pub file_name: String,
}

fn slice_and_name(size: (i64, i64, i64), origin: (f64, f64, f64), axis: Axis, pos: i64, basename: &str) -> PlannedSlice {
    let slice = Slice::new(size, axis, pos);
    let origin_component = match axis {
        Axis::X => origin.0,
        Axis::Y => origin.1,
        Axis::Z => origin.2,
    };
    let file_name = format!(
        "slice{}{}_{}.png",
        axis.letter(),
        pos + origin_component as i64,
        basename
    );
    PlannedSlice { slice, file_name }
}

/// Builds the default three-axis centre slice set for `var`, suppressing
/// any axis whose slice would have either dimension `<= delta` (spec
/// §4.8). `basename` should already have had the shard-suffix and
/// `tomo`/`segmented` rewrites applied.
pub fn default_slice_set(var: &VolumeDescriptor, delta: i64, basename: &str) -> Vec<PlannedSlice> {
    let (x, y, z) = var.size;
    let pos = (
        (x - 1) / 2,
        (y - 1) / 2,
        (z - 1) / 2,
    );

    let mut slices = Vec::new();
    if y > delta && z > delta {
        slices.push(slice_and_name(var.size, var.origin, Axis::X, pos.0, basename));
    }
    if x > delta && z > delta {
        slices.push(slice_and_name(var.size, var.origin, Axis::Y, pos.1, basename));
    }
    if x > delta && y > delta {
        slices.push(slice_and_name(var.size, var.origin, Axis::Z, pos.2, basename));
    }
    slices
}

/// Derives the slice basename from a dataset path, following the
/// prototype's `slices()` rewrite: strip the NetCDF shard suffix, then
/// rewrite a leading `tomo` to `tom` or a leading `segmented` to `seg`.
pub fn slice_basename(path: &str) -> String {
    let file_name = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    let name = basename_netcdf(file_name);
    if let Some(rest) = name.strip_prefix("tomo") {
        format!("tom{rest}")
    } else if let Some(rest) = name.strip_prefix("segmented") {
        format!("seg{rest}")
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Dtype;

    fn descriptor(size: (i64, i64, i64)) -> VolumeDescriptor {
        VolumeDescriptor {
            name: "tomo".into(),
            size,
            origin: (0.0, 0.0, 0.0),
            dtype: Dtype::U16,
        }
    }

    #[test]
    fn all_three_axes_present_for_cubic_volume() {
        let var = descriptor((64, 64, 64));
        let slices = default_slice_set(&var, 10, "sample");
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0].file_name, "sliceX31_sample.png");
        assert_eq!(slices[1].file_name, "sliceY31_sample.png");
        assert_eq!(slices[2].file_name, "sliceZ31_sample.png");
    }

    #[test]
    fn thin_axis_is_suppressed() {
        let var = descriptor((64, 64, 4));
        let slices = default_slice_set(&var, 10, "sample");
        let names: Vec<&str> = slices.iter().map(|s| s.file_name.as_str()).collect();
        assert!(!names.iter().any(|n| n.starts_with("sliceZ")));
        assert!(names.iter().any(|n| n.starts_with("sliceX")));
        assert!(names.iter().any(|n| n.starts_with("sliceY")));
    }

    #[test]
    fn z_slice_update_copies_matching_plane() {
        let mut s = Slice::new((2, 2, 2), Axis::Z, 1);
        s.update((2, 2, 2), &[9.0, 9.0, 9.0, 9.0], 0);
        assert_eq!(s.content, vec![0.0, 0.0, 0.0, 0.0]);
        s.update((2, 2, 2), &[5.0, 6.0, 7.0, 8.0], 1);
        assert_eq!(s.content, vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn basename_rewrites_tomo_and_segmented() {
        assert_eq!(slice_basename("/data/tomo_vol.nc"), "tom_vol");
        assert_eq!(slice_basename("/data/segmented_vol_nc"), "seg_vol");
        assert_eq!(slice_basename("/data/labels.nc.bz2"), "labels");
    }
}
