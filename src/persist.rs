//! Binary persistence for [`Hierarchy`].
//!
//! Layout (little-endian): magic and version, then a CRC32-protected
//! payload with the metadata, the bincode-encoded parameters and every
//! scale, then the checksum. Files are written to a temporary sibling and
//! renamed into place once synced.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crc32fast::Hasher;
use tempfile::NamedTempFile;

use crate::config::HsneParameters;
use crate::hierarchy::{Hierarchy, Scale};
use crate::sparse::{SparseMatrix, SparseRow};
use crate::HsneError;

const PERSIST_MAGIC: [u8; 4] = *b"HSN1";
const PERSIST_VERSION: u32 = 1;
const NO_LANDMARK: u32 = u32::MAX;
// Upper bound on speculative allocation from untrusted length prefixes.
const MAX_PREALLOC: usize = 1 << 16;

fn write_u32<W: Write>(writer: &mut W, value: u32, hasher: Option<&mut Hasher>) -> io::Result<()> {
    let bytes = value.to_le_bytes();
    if let Some(h) = hasher {
        h.update(&bytes);
    }
    writer.write_all(&bytes)
}

fn write_u64<W: Write>(writer: &mut W, value: u64, hasher: Option<&mut Hasher>) -> io::Result<()> {
    let bytes = value.to_le_bytes();
    if let Some(h) = hasher {
        h.update(&bytes);
    }
    writer.write_all(&bytes)
}

fn write_f32<W: Write>(writer: &mut W, value: f32, hasher: Option<&mut Hasher>) -> io::Result<()> {
    let bytes = value.to_le_bytes();
    if let Some(h) = hasher {
        h.update(&bytes);
    }
    writer.write_all(&bytes)
}

fn read_u32<R: Read>(reader: &mut R, hasher: Option<&mut Hasher>) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    if let Some(h) = hasher {
        h.update(&buf);
    }
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R, hasher: Option<&mut Hasher>) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    if let Some(h) = hasher {
        h.update(&buf);
    }
    Ok(u64::from_le_bytes(buf))
}

fn read_f32<R: Read>(reader: &mut R, hasher: Option<&mut Hasher>) -> io::Result<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    if let Some(h) = hasher {
        h.update(&buf);
    }
    Ok(f32::from_le_bytes(buf))
}

fn usize_from_u64(value: u64) -> Result<usize, HsneError> {
    usize::try_from(value)
        .map_err(|_| HsneError::InvalidPersistence("value exceeds platform limits"))
}

fn len_to_u64(len: usize) -> Result<u64, HsneError> {
    u64::try_from(len)
        .map_err(|_| HsneError::InvalidPersistence("length exceeds persistence limits"))
}

fn write_u32_vec<W: Write>(
    writer: &mut W,
    values: &[u32],
    hasher: &mut Hasher,
) -> Result<(), HsneError> {
    write_u64(writer, len_to_u64(values.len())?, Some(&mut *hasher))?;
    for &v in values {
        write_u32(writer, v, Some(&mut *hasher))?;
    }
    Ok(())
}

fn read_u32_vec<R: Read>(reader: &mut R, hasher: &mut Hasher) -> Result<Vec<u32>, HsneError> {
    let len = usize_from_u64(read_u64(reader, Some(&mut *hasher))?)?;
    let mut values = Vec::with_capacity(len.min(MAX_PREALLOC));
    for _ in 0..len {
        values.push(read_u32(reader, Some(&mut *hasher))?);
    }
    Ok(values)
}

fn write_matrix<W: Write>(
    writer: &mut W,
    matrix: &SparseMatrix,
    hasher: &mut Hasher,
) -> Result<(), HsneError> {
    write_u64(writer, len_to_u64(matrix.num_rows())?, Some(&mut *hasher))?;
    write_u64(writer, len_to_u64(matrix.num_cols())?, Some(&mut *hasher))?;
    for row in matrix.rows() {
        let count = u32::try_from(row.len())
            .map_err(|_| HsneError::InvalidPersistence("row exceeds persistence limits"))?;
        write_u32(writer, count, Some(&mut *hasher))?;
        for (col, weight) in row.iter() {
            write_u32(writer, col, Some(&mut *hasher))?;
            write_f32(writer, weight, Some(&mut *hasher))?;
        }
    }
    Ok(())
}

fn read_matrix<R: Read>(reader: &mut R, hasher: &mut Hasher) -> Result<SparseMatrix, HsneError> {
    let num_rows = usize_from_u64(read_u64(reader, Some(&mut *hasher))?)?;
    let num_cols = usize_from_u64(read_u64(reader, Some(&mut *hasher))?)?;
    let mut rows = Vec::with_capacity(num_rows.min(MAX_PREALLOC));
    for _ in 0..num_rows {
        let count = read_u32(reader, Some(&mut *hasher))? as usize;
        let mut entries: Vec<(u32, f32)> = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let col = read_u32(reader, Some(&mut *hasher))?;
            let weight = read_f32(reader, Some(&mut *hasher))?;
            if col as usize >= num_cols {
                return Err(HsneError::InvalidPersistence("matrix column out of range"));
            }
            if !weight.is_finite() || weight < 0.0 {
                return Err(HsneError::InvalidPersistence("matrix weight is not a probability"));
            }
            if matches!(entries.last(), Some(&(prev, _)) if prev >= col) {
                return Err(HsneError::InvalidPersistence("matrix columns are not ascending"));
            }
            entries.push((col, weight));
        }
        rows.push(SparseRow::from_sorted(entries));
    }
    Ok(SparseMatrix::from_rows_unchecked(rows, num_cols))
}

fn write_scale<W: Write>(
    writer: &mut W,
    scale: &Scale,
    hasher: &mut Hasher,
) -> Result<(), HsneError> {
    write_u64(writer, len_to_u64(scale.len())?, Some(&mut *hasher))?;
    write_matrix(writer, &scale.transition_matrix, hasher)?;
    write_u32_vec(writer, &scale.landmark_to_original, hasher)?;
    write_u32_vec(writer, &scale.landmark_to_previous, hasher)?;

    write_u64(writer, len_to_u64(scale.previous_to_landmark.len())?, Some(&mut *hasher))?;
    for entry in &scale.previous_to_landmark {
        write_u32(writer, entry.unwrap_or(NO_LANDMARK), Some(&mut *hasher))?;
    }

    write_u64(writer, len_to_u64(scale.landmark_weights.len())?, Some(&mut *hasher))?;
    for &w in &scale.landmark_weights {
        write_f32(writer, w, Some(&mut *hasher))?;
    }

    write_matrix(writer, &scale.area_of_influence, hasher)
}

/// Read one scale and check it against the size of the scale below it.
fn read_scale<R: Read>(
    reader: &mut R,
    hasher: &mut Hasher,
    previous_len: Option<usize>,
    num_points: usize,
) -> Result<Scale, HsneError> {
    let len = usize_from_u64(read_u64(reader, Some(&mut *hasher))?)?;
    if len == 0 {
        return Err(HsneError::InvalidPersistence("scale has no points"));
    }

    let transition_matrix = read_matrix(reader, hasher)?;
    if transition_matrix.num_rows() != len || transition_matrix.num_cols() != len {
        return Err(HsneError::InvalidPersistence("transition matrix shape mismatch"));
    }

    let landmark_to_original = read_u32_vec(reader, hasher)?;
    if landmark_to_original.len() != len
        || landmark_to_original.iter().any(|&p| p as usize >= num_points)
    {
        return Err(HsneError::InvalidPersistence("invalid landmark_to_original"));
    }

    let prev = previous_len.unwrap_or(num_points);
    let landmark_to_previous = read_u32_vec(reader, hasher)?;
    if landmark_to_previous.len() != len
        || landmark_to_previous.iter().any(|&p| p as usize >= prev)
        || landmark_to_previous.windows(2).any(|w| w[0] >= w[1])
    {
        return Err(HsneError::InvalidPersistence("invalid landmark_to_previous"));
    }

    let map_len = usize_from_u64(read_u64(reader, Some(&mut *hasher))?)?;
    if map_len != prev {
        return Err(HsneError::InvalidPersistence("previous_to_landmark length mismatch"));
    }
    let mut previous_to_landmark = Vec::with_capacity(map_len.min(MAX_PREALLOC));
    for _ in 0..map_len {
        let raw = read_u32(reader, Some(&mut *hasher))?;
        previous_to_landmark.push(match raw {
            NO_LANDMARK => None,
            id if (id as usize) < len => Some(id),
            _ => return Err(HsneError::InvalidPersistence("previous_to_landmark out of range")),
        });
    }

    let weights_len = usize_from_u64(read_u64(reader, Some(&mut *hasher))?)?;
    if weights_len != len {
        return Err(HsneError::InvalidPersistence("landmark weight count mismatch"));
    }
    let mut landmark_weights = Vec::with_capacity(weights_len.min(MAX_PREALLOC));
    for _ in 0..weights_len {
        landmark_weights.push(read_f32(reader, Some(&mut *hasher))?);
    }

    let area_of_influence = read_matrix(reader, hasher)?;
    let expected_rows = if previous_len.is_some() { prev } else { 0 };
    if area_of_influence.num_rows() != expected_rows || area_of_influence.num_cols() != len {
        return Err(HsneError::InvalidPersistence("area of influence shape mismatch"));
    }

    Ok(Scale {
        transition_matrix,
        landmark_to_original,
        landmark_to_previous,
        previous_to_landmark,
        landmark_weights,
        area_of_influence,
    })
}

/// Run `write` against a temporary file next to `path`, then sync it and
/// rename it over `path`. The temporary file is removed if any step fails.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<(), HsneError>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<(), HsneError>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| HsneError::Persistence(err.error))?;
    Ok(())
}

impl Hierarchy {
    /// Persist the hierarchy to `path`.
    ///
    /// The bytes go to a temporary file in the same directory which is
    /// synced and renamed over `path`. On failure `path` is left as it was.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), HsneError> {
        write_atomically(path.as_ref(), |file| self.save_to_writer(file))
    }

    /// Persist the hierarchy using the supplied writer.
    pub fn save_to_writer<W: Write>(&self, writer: W) -> Result<(), HsneError> {
        if self.scales().is_empty() {
            return Err(HsneError::NotInitialized);
        }
        let mut writer = BufWriter::new(writer);
        writer.write_all(&PERSIST_MAGIC)?;
        write_u32(&mut writer, PERSIST_VERSION, None)?;

        let mut hasher = Hasher::new();

        let dim = u32::try_from(self.dimensionality())
            .map_err(|_| HsneError::InvalidPersistence("dimension exceeds persistence limits"))?;
        write_u32(&mut writer, dim, Some(&mut hasher))?;
        write_u64(&mut writer, len_to_u64(self.num_points())?, Some(&mut hasher))?;
        write_u64(&mut writer, self.seed(), Some(&mut hasher))?;

        let params_bytes = bincode::serialize(self.parameters())
            .map_err(|_| HsneError::InvalidPersistence("failed to encode parameters"))?;
        write_u64(&mut writer, len_to_u64(params_bytes.len())?, Some(&mut hasher))?;
        writer.write_all(&params_bytes)?;
        hasher.update(&params_bytes);

        let scale_count = u32::try_from(self.scale_count())
            .map_err(|_| HsneError::InvalidPersistence("too many scales"))?;
        write_u32(&mut writer, scale_count, Some(&mut hasher))?;
        for scale in self.scales() {
            write_scale(&mut writer, scale, &mut hasher)?;
        }

        write_u32(&mut writer, hasher.finalize(), None)?;
        writer.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HsneError> {
        let mut bytes = Vec::new();
        self.save_to_writer(&mut bytes)?;
        Ok(bytes)
    }

    /// Load a hierarchy from the provided filesystem path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, HsneError> {
        let file = File::open(path)?;
        Self::load_from_reader(BufReader::new(file))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HsneError> {
        Self::load_from_reader(bytes)
    }

    /// Load a hierarchy from a persisted byte stream.
    pub fn load_from_reader<R: Read>(reader: R) -> Result<Self, HsneError> {
        let mut reader = BufReader::new(reader);
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != PERSIST_MAGIC {
            return Err(HsneError::InvalidPersistence("unrecognized file header"));
        }
        if read_u32(&mut reader, None)? != PERSIST_VERSION {
            return Err(HsneError::InvalidPersistence("unsupported hierarchy format version"));
        }

        let mut hasher = Hasher::new();

        let dim = read_u32(&mut reader, Some(&mut hasher))? as usize;
        if dim == 0 {
            return Err(HsneError::InvalidPersistence("dimension must be positive"));
        }
        let num_points = usize_from_u64(read_u64(&mut reader, Some(&mut hasher))?)?;
        if num_points == 0 || num_points > u32::MAX as usize {
            return Err(HsneError::InvalidPersistence("point count out of range"));
        }
        let seed = read_u64(&mut reader, Some(&mut hasher))?;

        let params_len = usize_from_u64(read_u64(&mut reader, Some(&mut hasher))?)?;
        if params_len > MAX_PREALLOC {
            return Err(HsneError::InvalidPersistence("parameter block too large"));
        }
        let mut params_bytes = vec![0u8; params_len];
        reader.read_exact(&mut params_bytes)?;
        hasher.update(&params_bytes);
        let params: HsneParameters = bincode::deserialize(&params_bytes)
            .map_err(|_| HsneError::InvalidPersistence("failed to decode parameters"))?;

        let scale_count = read_u32(&mut reader, Some(&mut hasher))? as usize;
        if scale_count == 0 {
            return Err(HsneError::InvalidPersistence("hierarchy has no scales"));
        }
        let mut scales: Vec<Scale> = Vec::with_capacity(scale_count.min(64));
        for _ in 0..scale_count {
            let previous_len = scales.last().map(Scale::len);
            let scale = read_scale(&mut reader, &mut hasher, previous_len, num_points)?;
            if previous_len.is_none() && scale.len() != num_points {
                return Err(HsneError::InvalidPersistence("data scale size mismatch"));
            }
            scales.push(scale);
        }

        let expected = hasher.finalize();
        let stored = read_u32(&mut reader, None)?;
        if expected != stored {
            return Err(HsneError::InvalidPersistence("checksum mismatch"));
        }

        Ok(Hierarchy::from_parts(params, seed, dim, num_points, scales))
    }
}
