//! Outgoing payload shaping.
//!
//! The IR carrier loses bit-clock recovery over long spans with few
//! transitions. When the transport is not stuffing complement bytes, a
//! chunk about to go out is scanned and shortened so that neither a long
//! run of zero bytes nor a long run of "sparse" bytes (popcount <= 2)
//! crosses the wire in one frame.

use log::debug;

/// Zero-run threshold when downloading over USB.
pub const MAX_ZEROS_USB: usize = 23;

/// Zero-run threshold when downloading over serial.
pub const MAX_ZEROS_SERIAL: usize = 30;

/// Sparse-run threshold.
pub const MAX_ONES: usize = 90;

/// Score ceiling for the sparse-byte walk: this many dense bytes inside a
/// window end the run.
const SPARSE_SCORE_LIMIT: i32 = 3;

/// A byte with at most two set bits carries too few transitions.
fn is_sparse(byte: u8) -> bool {
    byte.count_ones() <= 2
}

/// Chunk-size shaper with per-link thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Shaper {
    /// Maximum run of zero bytes allowed in one frame.
    pub max_zeros: usize,
    /// Maximum run of sparse bytes allowed in one frame.
    pub max_ones: usize,
}

impl Default for Shaper {
    fn default() -> Self {
        Self {
            max_zeros: MAX_ZEROS_SERIAL,
            max_ones: MAX_ONES,
        }
    }
}

impl Shaper {
    /// Possibly reduce a prospective chunk size of `requested` bytes so the
    /// frame does not desynchronize the line.
    ///
    /// `data` holds at least `requested` upcoming bytes. When `complement`
    /// is true the transport's complement-byte discipline already keeps the
    /// receiver clocked and the size passes through unchanged.
    #[must_use]
    pub fn adjust(&self, requested: usize, data: &[u8], complement: bool) -> usize {
        if complement {
            return requested;
        }

        let mut size = requested;

        // Zero-run guard: truncate at the first run of max_zeros zeros.
        if size > self.max_zeros {
            for i in 0..size - self.max_zeros {
                if data[i] != 0 {
                    continue;
                }
                let run = data[i..i + self.max_zeros]
                    .iter()
                    .take_while(|b| **b == 0)
                    .count();
                if run >= self.max_zeros {
                    size = i + self.max_zeros;
                    debug!("shortened chunk to {size}: {run} consecutive zeros");
                    break;
                }
            }
        }

        // Sparse-run guard, on the possibly truncated size. A walk that
        // covers max_ones bytes without accumulating enough dense bytes
        // ends the frame. Note the max(i, max_ones) result: when the run
        // starts early this lengthens rather than shortens the frame.
        // Surprising, but it is what the devices were qualified against.
        if size > self.max_ones {
            for i in 0..size - self.max_ones {
                if !is_sparse(data[i]) {
                    continue;
                }
                let mut score = 0i32;
                let mut j = 0;
                while j < self.max_ones {
                    if !is_sparse(data[i + j]) {
                        score += 1;
                        if score > SPARSE_SCORE_LIMIT {
                            break;
                        }
                    } else {
                        score = (score - 2).max(0);
                    }
                    j += 1;
                }
                if j >= self.max_ones {
                    size = i.max(self.max_ones);
                    debug!("shortened chunk to {size}: sparse run at {i}");
                    break;
                }
            }
        }

        size
    }
}
