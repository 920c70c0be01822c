use crate::error::{IngestError, RetrievalError};
use crate::models::IndexHit;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// File magic doubles as the format version.
const VECTOR_FILE_MAGIC: &[u8; 8] = b"DRVECT01";

/// Exhaustive nearest-neighbor store over fixed-dimension vectors.
///
/// Vectors live in one contiguous arena in insertion order; a vector's
/// position is its row number and is never reassigned. Distances are exact
/// squared L2 — no quantization, no approximation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimension: Option<usize>,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        match self.dimension {
            Some(dimension) => self.data.len() / dimension,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fixed dimension, once the first vector has been added.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let dimension = self.dimension?;
        let start = position.checked_mul(dimension)?;
        self.data.get(start..start + dimension)
    }

    /// Append vectors and return their positions, assigned sequentially from
    /// the current size. The whole batch is validated before anything is
    /// appended, so a failed add leaves the index untouched.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<usize>, IngestError> {
        let Some(first) = vectors.first() else {
            return Ok(Vec::new());
        };
        if first.is_empty() {
            return Err(IngestError::InvalidArgument(
                "embedding vectors must not be empty".to_string(),
            ));
        }

        let dimension = self.dimension.unwrap_or(first.len());
        for vector in vectors {
            if vector.len() != dimension {
                return Err(IngestError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
        }

        let start = self.len();
        self.dimension = Some(dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }

        Ok((start..start + vectors.len()).collect())
    }

    /// Exact search: up to `min(k, len)` hits sorted by ascending distance,
    /// position as the deterministic tie-break. Pure read.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>, RetrievalError> {
        if k == 0 {
            return Err(RetrievalError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut hits: Vec<IndexHit> = self
            .data
            .chunks_exact(dimension)
            .enumerate()
            .map(|(position, row)| IndexHit {
                position,
                distance: squared_l2(query, row),
            })
            .collect();

        hits.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then(left.position.cmp(&right.position))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Serialize to `path`: magic, dimension (u32 LE), count (u64 LE), then
    /// rows of f32 LE in insertion order. Dimension and count are readable
    /// from the header alone.
    pub fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(VECTOR_FILE_MAGIC)?;
        writer.write_all(&(self.dimension.unwrap_or(0) as u32).to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.flush()
    }

    pub fn read_from(path: &Path) -> Result<Self, RetrievalError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != VECTOR_FILE_MAGIC {
            return Err(RetrievalError::IndexCorruption(format!(
                "unrecognized vector file magic in {}",
                path.display()
            )));
        }

        let mut dimension_bytes = [0u8; 4];
        reader.read_exact(&mut dimension_bytes)?;
        let dimension = u32::from_le_bytes(dimension_bytes) as usize;

        let mut count_bytes = [0u8; 8];
        reader.read_exact(&mut count_bytes)?;
        let count = u64::from_le_bytes(count_bytes) as usize;

        if dimension == 0 {
            if count != 0 {
                return Err(RetrievalError::IndexCorruption(format!(
                    "vector file {} declares {count} vectors of dimension zero",
                    path.display()
                )));
            }
            return Ok(Self::new());
        }

        let values = count.checked_mul(dimension).ok_or_else(|| {
            RetrievalError::IndexCorruption(format!(
                "vector file {} header overflows: {count} x {dimension}",
                path.display()
            ))
        })?;

        let mut data = Vec::with_capacity(values);
        let mut value_bytes = [0u8; 4];
        for _ in 0..values {
            reader.read_exact(&mut value_bytes).map_err(|_| {
                RetrievalError::IndexCorruption(format!(
                    "vector file {} is shorter than its header claims",
                    path.display()
                ))
            })?;
            data.push(f32::from_le_bytes(value_bytes));
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(RetrievalError::IndexCorruption(format!(
                "vector file {} has trailing bytes beyond its header count",
                path.display()
            )));
        }

        Ok(Self {
            dimension: Some(dimension),
            data,
        })
    }
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right.iter())
        .map(|(a, b)| {
            let diff = a - b;
            diff * diff
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_index() -> FlatIndex {
        let mut index = FlatIndex::new();
        index
            .add(&[
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![0.0, 2.0],
                vec![3.0, 3.0],
            ])
            .expect("add");
        index
    }

    #[test]
    fn positions_are_assigned_sequentially() {
        let mut index = FlatIndex::new();
        let first = index.add(&[vec![1.0, 2.0]]).expect("add");
        let second = index.add(&[vec![3.0, 4.0], vec![5.0, 6.0]]).expect("add");
        assert_eq!(first, vec![0]);
        assert_eq!(second, vec![1, 2]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn mismatched_dimension_add_is_rejected_atomically() {
        let mut index = sample_index();
        let result = index.add(&[vec![1.0, 1.0], vec![1.0, 1.0, 1.0]]);
        assert!(matches!(
            result,
            Err(IngestError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn search_orders_by_ascending_distance() {
        let index = sample_index();
        let hits = index.search(&[0.0, 0.0], 4).expect("search");

        assert_eq!(hits.len(), 4);
        assert_eq!(
            hits.iter().map(|hit| hit.position).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        assert_eq!(hits[3].distance, 18.0);
    }

    #[test]
    fn search_caps_results_at_index_size() {
        let index = sample_index();
        let hits = index.search(&[0.0, 0.0], 50).expect("search");
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn zero_k_is_invalid() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[0.0, 0.0], 0),
            Err(RetrievalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn query_dimension_mismatch_is_fatal() {
        let index = sample_index();
        assert!(matches!(
            index.search(&[0.0, 0.0, 0.0], 2),
            Err(RetrievalError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let index = FlatIndex::new();
        let hits = index.search(&[0.5, 0.5], 5).expect("search");
        assert!(hits.is_empty());
    }

    #[test]
    fn persist_then_restore_round_trips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("vectors.bin");

        let index = sample_index();
        index.write_to(&path).expect("write");
        let restored = FlatIndex::read_from(&path).expect("read");

        assert_eq!(restored, index);
        assert_eq!(
            restored.search(&[0.1, 0.2], 3).expect("search"),
            index.search(&[0.1, 0.2], 3).expect("search")
        );
    }

    #[test]
    fn truncated_file_reads_as_corruption() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("vectors.bin");

        sample_index().write_to(&path).expect("write");
        let bytes = std::fs::read(&path).expect("read bytes");
        std::fs::write(&path, &bytes[..bytes.len() - 4]).expect("truncate");

        assert!(matches!(
            FlatIndex::read_from(&path),
            Err(RetrievalError::IndexCorruption(_))
        ));
    }

    #[test]
    fn empty_index_survives_persistence() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("vectors.bin");

        FlatIndex::new().write_to(&path).expect("write");
        let restored = FlatIndex::read_from(&path).expect("read");
        assert!(restored.is_empty());
        assert_eq!(restored.dimension(), None);
    }
}
