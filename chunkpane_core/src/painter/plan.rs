//! Pure range-planning logic (SPEC_FULL.md §4.6.3), decoupled from any live
//! pane via the [`IntactQuery`] trait so it's unit-testable without I/O.

use crate::shape::MerkleShape;

/// Default minimum download size: ranges smaller than this are merged or
/// tolerated only at the tail.
pub const MIN_DOWNLOAD_SIZE: u64 = 4 * 1024 * 1024;

/// Default maximum download size: a single range is never issued larger
/// than this, except when a single chunk alone already exceeds it.
pub const MAX_DOWNLOAD_SIZE: u64 = 32 * 1024 * 1024;

/// Minimal view of chunk state the planner needs: whether a chunk already
/// has valid bytes locally, and whether a fetch for it is already underway.
pub trait IntactQuery {
    fn is_chunk_intact(&self, chunk: u64) -> bool;
    fn is_in_flight(&self, chunk: u64) -> bool;
}

/// A contiguous, half-open span of chunk indices to fetch as one range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedRange {
    pub start_chunk: u64,
    pub end_chunk: u64,
}

impl PlannedRange {
    #[must_use]
    pub fn byte_range(&self, shape: &MerkleShape) -> (u64, u64) {
        let (lo, _) = shape.chunk_range(self.start_chunk);
        let (_, hi) = shape.chunk_range(self.end_chunk - 1);
        (lo, hi)
    }

    #[must_use]
    pub fn byte_size(&self, shape: &MerkleShape) -> u64 {
        let (lo, hi) = self.byte_range(shape);
        hi - lo
    }
}

struct Pending {
    start_chunk: u64,
    end_chunk: u64,
    size: u64,
}

/// Plan fetch ranges covering the chunks `start_chunk..=end_chunk_incl`
/// that are neither intact nor already in flight, per the coalescing
/// policy in SPEC_FULL.md §4.6.3.
#[must_use]
pub fn plan_ranges(
    shape: &MerkleShape,
    query: &dyn IntactQuery,
    start_chunk: u64,
    end_chunk_incl: u64,
    min_download_size: u64,
    max_download_size: u64,
) -> Vec<PlannedRange> {
    let mut ranges = Vec::new();
    let mut pending: Option<Pending> = None;

    let close = |ranges: &mut Vec<PlannedRange>, pending: Pending| {
        ranges.push(PlannedRange {
            start_chunk: pending.start_chunk,
            end_chunk: pending.end_chunk,
        });
    };

    for chunk in start_chunk..=end_chunk_incl {
        if query.is_chunk_intact(chunk) || query.is_in_flight(chunk) {
            if let Some(p) = pending.take() {
                if p.size >= min_download_size || ranges.is_empty() {
                    close(&mut ranges, p);
                }
            }
            continue;
        }

        let (lo, hi) = shape.chunk_range(chunk);
        let chunk_len = hi - lo;

        pending = match pending {
            None => Some(Pending {
                start_chunk: chunk,
                end_chunk: chunk + 1,
                size: chunk_len,
            }),
            Some(p) => {
                let new_size = p.size + chunk_len;
                if new_size > max_download_size {
                    if p.size >= min_download_size {
                        close(&mut ranges, p);
                        Some(Pending {
                            start_chunk: chunk,
                            end_chunk: chunk + 1,
                            size: chunk_len,
                        })
                    } else {
                        // Oversize tolerated rather than emit a too-small range.
                        close(
                            &mut ranges,
                            Pending {
                                start_chunk: p.start_chunk,
                                end_chunk: chunk + 1,
                                size: new_size,
                            },
                        );
                        None
                    }
                } else {
                    Some(Pending {
                        start_chunk: p.start_chunk,
                        end_chunk: chunk + 1,
                        size: new_size,
                    })
                }
            }
        };
    }

    if let Some(p) = pending {
        if p.size >= min_download_size || ranges.is_empty() {
            close(&mut ranges, p);
        } else if let Some(last) = ranges.last().copied() {
            // Only mergeable when chunk-contiguous with no skipped chunks in
            // between — otherwise the "merged" byte range would silently
            // re-cover already-intact chunks.
            let last_size = last.byte_size(shape);
            if last.end_chunk == p.start_chunk && last_size + p.size <= max_download_size {
                ranges.pop();
                ranges.push(PlannedRange {
                    start_chunk: last.start_chunk,
                    end_chunk: p.end_chunk,
                });
            } else {
                close(&mut ranges, p);
            }
        } else {
            close(&mut ranges, p);
        }
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeQuery {
        intact: Vec<u64>,
        in_flight: Vec<u64>,
    }

    impl IntactQuery for FakeQuery {
        fn is_chunk_intact(&self, chunk: u64) -> bool {
            self.intact.contains(&chunk)
        }
        fn is_in_flight(&self, chunk: u64) -> bool {
            self.in_flight.contains(&chunk)
        }
    }

    fn shape_1mib_chunks(leaves: u64) -> MerkleShape {
        MerkleShape::for_content(leaves * 1024 * 1024, 1024 * 1024).unwrap()
    }

    #[test]
    fn cold_aligned_range_emits_single_range_below_min() {
        let shape = shape_1mib_chunks(10);
        let query = FakeQuery {
            intact: vec![],
            in_flight: vec![],
        };
        let ranges = plan_ranges(&shape, &query, 0, 2, MIN_DOWNLOAD_SIZE, MAX_DOWNLOAD_SIZE);
        assert_eq!(
            ranges,
            vec![PlannedRange {
                start_chunk: 0,
                end_chunk: 3
            }]
        );
    }

    #[test]
    fn range_coalescing_scenario_from_spec() {
        let shape = shape_1mib_chunks(10);
        let query = FakeQuery {
            intact: vec![4, 5, 6],
            in_flight: vec![],
        };
        let ranges = plan_ranges(
            &shape,
            &query,
            0,
            8,
            4 * 1024 * 1024,
            8 * 1024 * 1024,
        );
        assert_eq!(
            ranges,
            vec![
                PlannedRange {
                    start_chunk: 0,
                    end_chunk: 4
                },
                PlannedRange {
                    start_chunk: 7,
                    end_chunk: 9
                },
            ]
        );
    }

    #[test]
    fn planned_ranges_never_include_intact_or_in_flight_chunks() {
        let shape = shape_1mib_chunks(20);
        let query = FakeQuery {
            intact: vec![2, 3],
            in_flight: vec![9],
        };
        let ranges = plan_ranges(&shape, &query, 0, 12, MIN_DOWNLOAD_SIZE, MAX_DOWNLOAD_SIZE);
        for r in &ranges {
            for chunk in r.start_chunk..r.end_chunk {
                assert!(!query.is_chunk_intact(chunk));
                assert!(!query.is_in_flight(chunk));
            }
        }
    }

    #[test]
    fn oversize_single_chunk_is_still_emitted_alone() {
        let shape = MerkleShape::for_content(64 * 1024 * 1024, 64 * 1024 * 1024).unwrap();
        let query = FakeQuery {
            intact: vec![],
            in_flight: vec![],
        };
        let ranges = plan_ranges(&shape, &query, 0, 0, MIN_DOWNLOAD_SIZE, MAX_DOWNLOAD_SIZE);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].byte_size(&shape), 64 * 1024 * 1024);
    }
}
