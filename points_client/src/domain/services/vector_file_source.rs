use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use common::helper::error_chain_fmt;
use tracing::info;

use crate::domain::entities::point::Vector;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const F32_SIZE: usize = std::mem::size_of::<f32>();

/// Streams the rows of a float32 vectors file, one row at a time.
///
/// Two layouts are read:
/// - raw row-major little-endian `f32` values, the dimension being given by the caller
/// - NumPy `.npy` v1/v2 files of shape `(N, D)` with dtype `<f4`, detected by their magic bytes
///
/// The whole file is never loaded in memory, so it can back an upload of any size.
pub struct VectorFileSource {
    reader: BufReader<File>,
    dim: usize,
    rows: usize,
    read_rows: usize,
}

impl VectorFileSource {
    #[tracing::instrument(name = "Opening vectors file", skip(path), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, dim: usize) -> Result<Self, VectorFileSourceError> {
        if dim == 0 {
            return Err(VectorFileSourceError::InvalidHeader(
                "dimension must be greater than 0".into(),
            ));
        }

        let file = File::open(path.as_ref())?;
        let file_len = file.metadata()?.len() as usize;
        let mut reader = BufReader::new(file);

        let mut data_len = file_len;
        let mut header_rows = None;
        let mut magic = [0u8; 6];
        if file_len >= NPY_MAGIC.len() {
            reader.read_exact(&mut magic)?;
            if &magic[..] == NPY_MAGIC {
                let (header, header_len) = read_npy_header(&mut reader)?;
                if header.cols != dim {
                    return Err(VectorFileSourceError::DimensionMismatch {
                        expected: dim,
                        found: header.cols,
                    });
                }
                data_len = file_len - NPY_MAGIC.len() - header_len;
                header_rows = Some(header.rows);
            } else {
                // Raw file: the magic bytes were data
                reader = BufReader::new(File::open(path.as_ref())?);
            }
        }

        let row_len = dim * F32_SIZE;
        if data_len % row_len != 0 {
            return Err(VectorFileSourceError::TruncatedRow {
                row: data_len / row_len,
            });
        }
        let rows = data_len / row_len;
        if let Some(header_rows) = header_rows {
            if rows != header_rows {
                return Err(VectorFileSourceError::TruncatedRow { row: rows });
            }
        }

        info!(rows, dim, "Vectors file opened");

        Ok(Self {
            reader,
            dim,
            rows,
            read_rows: 0,
        })
    }

    /// Number of rows of the file
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Writes rows as a raw row-major little-endian `f32` file, returning the number of rows written
    pub fn write_rows<Row: AsRef<[f32]>>(
        path: impl AsRef<Path>,
        rows: impl IntoIterator<Item = Row>,
    ) -> Result<usize, VectorFileSourceError> {
        let mut writer = BufWriter::new(File::create(path)?);
        let mut dim = None;
        let mut count = 0;

        for row in rows {
            let row = row.as_ref();
            match dim {
                None => dim = Some(row.len()),
                Some(dim) if dim != row.len() => {
                    return Err(VectorFileSourceError::DimensionMismatch {
                        expected: dim,
                        found: row.len(),
                    })
                }
                Some(_) => (),
            }
            for value in row {
                writer.write_all(&value.to_le_bytes())?;
            }
            count += 1;
        }

        writer.flush()?;
        Ok(count)
    }
}

impl Iterator for VectorFileSource {
    type Item = Result<Vector, VectorFileSourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.read_rows >= self.rows {
            return None;
        }

        let mut buffer = vec![0u8; self.dim * F32_SIZE];
        if let Err(error) = self.reader.read_exact(&mut buffer) {
            // Stops after the error, the file changed under our feet
            self.read_rows = self.rows;
            return Some(Err(error.into()));
        }
        self.read_rows += 1;

        Some(Ok(buffer
            .chunks_exact(F32_SIZE)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.rows - self.read_rows;
        (remaining, Some(remaining))
    }
}

#[derive(Debug, PartialEq)]
struct NpyHeader {
    rows: usize,
    cols: usize,
}

/// Reads the header following the magic bytes, returns it with its length (version bytes included)
fn read_npy_header(reader: &mut impl Read) -> Result<(NpyHeader, usize), VectorFileSourceError> {
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;

    let (header_len, len_size) = match version[0] {
        1 => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            (u16::from_le_bytes(len) as usize, 2)
        }
        2 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            (u32::from_le_bytes(len) as usize, 4)
        }
        major => {
            return Err(VectorFileSourceError::InvalidHeader(format!(
                "unsupported .npy version {}.{}",
                major, version[1]
            )))
        }
    };

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8(header)
        .map_err(|_| VectorFileSourceError::InvalidHeader("header is not utf8".into()))?;

    Ok((parse_npy_header(&header)?, 2 + len_size + header_len))
}

/// Parses the python dict literal of a `.npy` header, ex:
/// `{'descr': '<f4', 'fortran_order': False, 'shape': (1000, 100), }`
fn parse_npy_header(header: &str) -> Result<NpyHeader, VectorFileSourceError> {
    if !(header.contains("'<f4'") || header.contains("'float32'")) {
        return Err(VectorFileSourceError::InvalidHeader(format!(
            "dtype must be little-endian float32: {}",
            header.trim()
        )));
    }
    if header.contains("'fortran_order': True") {
        return Err(VectorFileSourceError::InvalidHeader(
            "fortran order is not supported".into(),
        ));
    }

    let shape = header
        .split("'shape':")
        .nth(1)
        .and_then(|rest| {
            let start = rest.find('(')?;
            let end = rest.find(')')?;
            rest.get(start + 1..end)
        })
        .ok_or_else(|| VectorFileSourceError::InvalidHeader("missing shape".into()))?;

    let dims = shape
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.parse::<usize>()
                .map_err(|_| VectorFileSourceError::InvalidHeader(format!("invalid shape {}", dim)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match dims.as_slice() {
        [rows, cols] => Ok(NpyHeader {
            rows: *rows,
            cols: *cols,
        }),
        _ => Err(VectorFileSourceError::InvalidHeader(format!(
            "shape must be 2-D, got ({})",
            shape
        ))),
    }
}

#[derive(thiserror::Error)]
pub enum VectorFileSourceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Invalid vectors file header: {0}")]
    InvalidHeader(String),
    #[error("Vectors file ends in the middle of row {row}")]
    TruncatedRow { row: usize },
    #[error("Expected vectors of dimension {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

impl std::fmt::Debug for VectorFileSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
