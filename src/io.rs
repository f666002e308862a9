//! `.fvecs` point files: every record is an `i32` dimension followed by
//! that many little-endian `f32` values.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

/// Row-major point matrix read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMatrix {
    pub data: Vec<f32>,
    pub dim: usize,
}

impl PointMatrix {
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, message)
}

/// Read up to `limit` records into one flat buffer. Every record must have
/// the dimension of the first.
pub fn read_point_matrix_from_reader<R: Read>(
    mut reader: R,
    limit: Option<usize>,
) -> io::Result<PointMatrix> {
    let mut data = Vec::new();
    let mut dim: Option<usize> = None;
    let mut rows = 0usize;

    loop {
        if limit.is_some_and(|max| rows >= max) {
            break;
        }

        let mut dim_buf = [0u8; 4];
        match reader.read_exact(&mut dim_buf) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }
        let record_dim = i32::from_le_bytes(dim_buf);
        if record_dim <= 0 {
            return Err(invalid(format!(
                "non-positive dimension {record_dim} in record {rows}"
            )));
        }
        let record_dim = record_dim as usize;
        match dim {
            None => dim = Some(record_dim),
            Some(expected) if expected != record_dim => {
                return Err(invalid(format!(
                    "record {rows} has dimension {record_dim}, expected {expected}"
                )));
            }
            Some(_) => {}
        }

        let mut buffer = vec![0u8; record_dim * 4];
        reader.read_exact(&mut buffer)?;
        data.extend(
            buffer
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        rows += 1;
    }

    Ok(PointMatrix {
        data,
        dim: dim.unwrap_or(0),
    })
}

pub fn read_point_matrix<P: AsRef<Path>>(path: P, limit: Option<usize>) -> io::Result<PointMatrix> {
    let file = File::open(path)?;
    read_point_matrix_from_reader(BufReader::new(file), limit)
}

/// Write a row-major buffer with `dim` columns as `.fvecs` records.
pub fn write_fvecs_to_writer<W: Write>(writer: W, data: &[f32], dim: usize) -> io::Result<()> {
    if dim == 0 || data.len() % dim != 0 {
        return Err(invalid(format!(
            "{} values do not form rows of dimension {dim}",
            data.len()
        )));
    }
    let dim_i32 = i32::try_from(dim).map_err(|_| invalid(format!("dimension {dim} too large")))?;

    let mut writer = BufWriter::new(writer);
    for row in data.chunks_exact(dim) {
        writer.write_all(&dim_i32.to_le_bytes())?;
        for value in row {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    writer.flush()
}

pub fn write_fvecs<P: AsRef<Path>>(path: P, data: &[f32], dim: usize) -> io::Result<()> {
    write_fvecs_to_writer(File::create(path)?, data, dim)
}
