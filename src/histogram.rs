//! C7: frequency histogram over a series of z-planes, supporting both the
//! integer "bincount" mode and the float rescale-to-16-bit mode, plus
//! percentile queries used to pick display `lo`/`hi` bounds (spec §4.7).
//! Grounded on the Python prototype's `make_slices.py::Histogram` and its
//! module-level `bottom_percentile`/`top_percentile` functions.

/// A running frequency count over `f64`-widened plane data. In integer
/// mode (`binsize == 1.0`), each distinct sample value maps to its own
/// bin. In float mode, samples are rescaled into 65536 bins spanning
/// `[minval, maxval)`.
pub struct Histogram {
    mask_value: f64,
    offset: f64,
    binsize: f64,
    counts: Vec<u64>,
    total: u64,
    masked: u64,
}

impl Histogram {
    /// Integer mode: one bin per value, masked entries counted separately.
    pub fn new_integer(mask_value: f64) -> Histogram {
        Histogram {
            mask_value,
            offset: 0.0,
            binsize: 1.0,
            counts: Vec::new(),
            total: 0,
            masked: 0,
        }
    }

    /// Float mode: rescales `[minval, maxval)` into 65536 bins, matching
    /// the prototype's `(maxval - minval) * (1 - 1e-12) / 0x10000` binsize.
    pub fn new_float(mask_value: f64, minval: f64, maxval: f64) -> Histogram {
        Histogram {
            mask_value,
            offset: minval,
            binsize: (maxval - minval) * (1.0 - 1.0e-12) / 65536.0,
            counts: Vec::new(),
            total: 0,
            masked: 0,
        }
    }

    /// Folds one plane's worth of samples into the running count. Values
    /// that rescale to the mask bin, or fall outside `[0, 0xffff]`, are
    /// counted as masked rather than binned.
    pub fn update(&mut self, plane: &[f64]) {
        let mut new_masked = 0u64;
        let mut bin_hits: Vec<usize> = Vec::with_capacity(plane.len());

        for &v in plane {
            let scaled = ((v - self.offset) / self.binsize) as i64;
            let is_mask = scaled == self.mask_value as i64 || scaled < 0 || scaled > 0xffff;
            if is_mask {
                new_masked += 1;
            } else {
                bin_hits.push(scaled as usize);
            }
        }

        if let Some(&max_bin) = bin_hits.iter().max() {
            if max_bin + 1 > self.counts.len() {
                self.counts.resize(max_bin + 1, 0);
            }
        }
        for bin in &bin_hits {
            self.counts[*bin] += 1;
        }

        self.masked += new_masked;
        self.total += new_masked + bin_hits.len() as u64;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn masked(&self) -> u64 {
        self.masked
    }

    /// Number of allocated bins (`counts.size` in the prototype), used by
    /// the orchestrator's non-`tom` contrast range (`0, counts.size - 1`).
    pub fn counts_len(&self) -> usize {
        self.counts.len()
    }

    /// The smallest value `v` such that at least `p` percent of non-masked
    /// entries counted so far are `<= v`. Returns `0.0` if there are no
    /// non-masked entries (spec §9 Open Question: empty histograms feed
    /// directly into display-range arithmetic, so there is no sentinel).
    pub fn bottom_percentile(&self, p: f64) -> f64 {
        let non_masked = self.total - self.masked;
        if non_masked == 0 {
            return 0.0;
        }
        let threshold = p * non_masked as f64 / 100.0;
        let mut count = 0u64;
        for (i, &c) in self.counts.iter().enumerate() {
            count += c;
            if count as f64 >= threshold {
                return self.offset + i as f64 * self.binsize;
            }
        }
        0.0
    }

    /// The largest value `v` such that at least `p` percent of non-masked
    /// entries counted so far are `>= v`. Same empty-histogram convention
    /// as [`Histogram::bottom_percentile`].
    pub fn top_percentile(&self, p: f64) -> f64 {
        let non_masked = self.total - self.masked;
        if non_masked == 0 {
            return 0.0;
        }
        let threshold = p * non_masked as f64 / 100.0;
        let mut count = 0u64;
        for (i, &c) in self.counts.iter().enumerate().rev() {
            count += c;
            if count as f64 >= threshold {
                return self.offset + i as f64 * self.binsize;
            }
        }
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_mode_bincounts_and_masks() {
        let mut h = Histogram::new_integer(0xff as f64);
        h.update(&[1.0, 2.0, 2.0, 0xff as f64]);
        assert_eq!(h.total(), 4);
        assert_eq!(h.masked(), 1);
    }

    #[test]
    fn percentiles_span_full_range_for_uniform_data() {
        let mut h = Histogram::new_integer(0xff as f64);
        h.update(&(0..100).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(h.bottom_percentile(0.0), 0.0);
        assert_eq!(h.top_percentile(0.0), 99.0);
    }

    #[test]
    fn empty_histogram_percentiles_are_zero() {
        let h = Histogram::new_integer(0xff as f64);
        assert_eq!(h.bottom_percentile(50.0), 0.0);
        assert_eq!(h.top_percentile(50.0), 0.0);
    }

    #[test]
    fn float_mode_rescales_into_bins() {
        let mut h = Histogram::new_float(1.0e30, 0.0, 100.0);
        h.update(&[0.0, 50.0, 99.9]);
        assert_eq!(h.total(), 3);
        assert_eq!(h.masked(), 0);
    }
}
