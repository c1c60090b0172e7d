// CIFTI matrix handle: NIFTI-2 container, row-addressed access, and write locking.
use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use memmap2::{Mmap, MmapMut};

use crate::core::error::{Error, ErrorKind};
use crate::core::nifti::{
    ByteOrder, CIFTI_EXTENSION_CODE, EXTENDER_SIZE, Extension, HEADER_SIZE, Intent, NiftiHeader,
    cifti_xml_text, decode_extensions, encode_extensions,
};
use crate::mapping::CiftiXml;

const VALUE_SIZE: usize = std::mem::size_of::<f32>();

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheMode {
    /// Rows are read from and written to a memory map of the file.
    OnDisk,
    /// The whole matrix is held in memory; writers emit the file on `finish`.
    InMemory,
}

impl CacheMode {
    pub fn name(self) -> &'static str {
        match self {
            CacheMode::OnDisk => "on-disk",
            CacheMode::InMemory => "in-memory",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CreateOptions {
    pub cache_mode: CacheMode,
    pub byte_order: ByteOrder,
}

impl CreateOptions {
    pub fn new(cache_mode: CacheMode) -> Self {
        Self {
            cache_mode,
            byte_order: ByteOrder::Little,
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }
}

enum Backing {
    /// Writer whose mapping model has not been fixed yet.
    Pending,
    Memory(Vec<f32>),
    Mapped(Mmap),
    MappedMut(MmapMut),
}

struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub struct CiftiMatrix {
    path: PathBuf,
    lock: Option<FileLock>,
    backing: Backing,
    xml: Option<CiftiXml>,
    cache_mode: CacheMode,
    byte_order: ByteOrder,
    intent: Intent,
    rows: usize,
    columns: usize,
    data_offset: usize,
    scaling: Option<(f64, f64)>,
    writable: bool,
    rows_written: bool,
    finished: bool,
    row_reads: Cell<u64>,
}

impl CiftiMatrix {
    /// Opens an existing file, reading header and mapping model up front.
    pub fn open(path: impl AsRef<Path>, cache_mode: CacheMode) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        Self::open_inner(&path, cache_mode).map_err(|err| err.or_path(&path))
    }

    fn open_inner(path: &Path, cache_mode: CacheMode) -> Result<Self, Error> {
        let mut file = File::open(path).map_err(|err| io_error(err, path))?;
        let actual_size = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| io_error(err, path))?;

        let header = read_header(&mut file, path, actual_size)?;
        let (rows, columns) = header.validate()?;
        let data_offset = usize::try_from(header.vox_offset)
            .map_err(|_| Error::new(ErrorKind::Format).with_message("vox_offset is out of range"))?;
        if data_offset as u64 > actual_size {
            return Err(Error::new(ErrorKind::Format)
                .with_message("vox_offset points past the end of the file")
                .with_offset(168));
        }

        let mut extension_bytes = vec![0u8; data_offset - HEADER_SIZE];
        file.seek(SeekFrom::Start(HEADER_SIZE as u64))
            .map_err(|err| io_error(err, path))?;
        file.read_exact(&mut extension_bytes)
            .map_err(|err| io_error(err, path))?;
        let extensions = decode_extensions(&extension_bytes, header.byte_order)?;
        let xml = CiftiXml::from_xml_str(&cifti_xml_text(&extensions)?)?;
        if xml.number_of_rows() != rows || xml.number_of_columns() != columns {
            return Err(Error::new(ErrorKind::Format).with_message(format!(
                "XML describes a {}x{} matrix but the header says {rows}x{columns}",
                xml.number_of_rows(),
                xml.number_of_columns()
            )));
        }

        let data_len = data_len(rows, columns)?;
        if (actual_size as u128) < data_offset as u128 + data_len as u128 {
            return Err(Error::new(ErrorKind::Format).with_message(format!(
                "file holds {} data bytes, expected {data_len}",
                actual_size.saturating_sub(data_offset as u64)
            )));
        }

        let (backing, lock) = match cache_mode {
            CacheMode::OnDisk => {
                FileExt::try_lock_shared(&file)
                    .map_err(|err| lock_error(err, path))?;
                let mmap = unsafe { Mmap::map(&file).map_err(|err| io_error(err, path))? };
                (Backing::Mapped(mmap), Some(FileLock { file }))
            }
            CacheMode::InMemory => {
                let mut raw = vec![0u8; data_len];
                file.seek(SeekFrom::Start(data_offset as u64))
                    .map_err(|err| io_error(err, path))?;
                file.read_exact(&mut raw).map_err(|err| io_error(err, path))?;
                let mut values = vec![0f32; rows * columns];
                decode_values(&raw, header.byte_order, None, &mut values);
                (Backing::Memory(values), None)
            }
        };

        tracing::debug!(
            path = %path.display(),
            rows,
            columns,
            mode = cache_mode.name(),
            byte_order = header.byte_order.name(),
            "opened cifti matrix"
        );

        Ok(Self {
            path: path.to_path_buf(),
            lock,
            backing,
            xml: Some(xml),
            cache_mode,
            byte_order: header.byte_order,
            intent: header.intent().unwrap_or(Intent::ConnUnknown),
            rows,
            columns,
            data_offset,
            scaling: header.scaling(),
            writable: false,
            rows_written: false,
            finished: false,
            row_reads: Cell::new(0),
        })
    }

    /// Opens or creates an output file and takes an exclusive lock on it.
    ///
    /// Existing contents are left alone until a mapping model is set, so a
    /// caller that fails validation never damages a previous output.
    pub fn create(path: impl AsRef<Path>, options: CreateOptions) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| io_error(err, &path))?;
        FileExt::try_lock_exclusive(&file).map_err(|err| lock_error(err, &path))?;

        Ok(Self {
            path,
            lock: Some(FileLock { file }),
            backing: Backing::Pending,
            xml: None,
            cache_mode: options.cache_mode,
            byte_order: options.byte_order,
            intent: Intent::ConnUnknown,
            rows: 0,
            columns: 0,
            data_offset: 0,
            scaling: None,
            writable: true,
            rows_written: false,
            finished: false,
            row_reads: Cell::new(0),
        })
    }

    /// Creates an output file with its mapping model already fixed.
    pub fn create_with_xml(
        path: impl AsRef<Path>,
        xml: CiftiXml,
        options: CreateOptions,
    ) -> Result<Self, Error> {
        let mut matrix = Self::create(path, options)?;
        matrix.set_cifti_xml(xml)?;
        Ok(matrix)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Number of `get_row` calls served so far.
    pub fn row_reads(&self) -> u64 {
        self.row_reads.get()
    }

    pub fn cifti_xml(&self) -> Result<&CiftiXml, Error> {
        self.xml.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("mapping model has not been set")
                .with_path(&self.path)
        })
    }

    /// Fixes or replaces the mapping model of a writer.
    ///
    /// Before any row is written the backing store is (re)allocated to the new
    /// dimensions. Afterwards the dimensions must stay the same, and an on-disk
    /// writer must fit the new XML into its existing extension slot.
    pub fn set_cifti_xml(&mut self, xml: CiftiXml) -> Result<(), Error> {
        if !self.writable {
            return Err(Error::new(ErrorKind::FileAccess)
                .with_message("cannot change the mapping model of a read-only handle")
                .with_path(&self.path));
        }
        let rows = xml.number_of_rows();
        let columns = xml.number_of_columns();
        if self.rows_written {
            if rows != self.rows || columns != self.columns {
                return Err(Error::new(ErrorKind::DimensionMismatch)
                    .with_message(format!(
                        "rows were already written for a {}x{} matrix, new mapping model is {rows}x{columns}",
                        self.rows, self.columns
                    ))
                    .with_path(&self.path));
            }
            if let Backing::MappedMut(mmap) = &mut self.backing {
                let capacity = self.data_offset - HEADER_SIZE;
                let metadata = encode_metadata(&xml, self.byte_order, Some(capacity))?;
                if metadata.len() != self.data_offset {
                    return Err(Error::new(ErrorKind::Format)
                        .with_message("mapping model no longer fits in the written extension")
                        .with_path(&self.path));
                }
                mmap[..self.data_offset].copy_from_slice(&metadata);
            }
            self.intent = xml.intent();
            self.xml = Some(xml);
            return Ok(());
        }

        self.allocate(&xml, rows, columns)?;
        self.intent = xml.intent();
        self.xml = Some(xml);
        Ok(())
    }

    fn allocate(&mut self, xml: &CiftiXml, rows: usize, columns: usize) -> Result<(), Error> {
        let data_len = data_len(rows, columns)?;
        self.backing = Backing::Pending;
        match self.cache_mode {
            CacheMode::InMemory => {
                self.data_offset = encode_metadata(xml, self.byte_order, None)?.len();
                self.backing = Backing::Memory(vec![0f32; rows * columns]);
            }
            CacheMode::OnDisk => {
                let metadata = encode_metadata(xml, self.byte_order, None)?;
                let Some(lock) = &self.lock else {
                    return Err(Error::new(ErrorKind::Internal).with_message("writer lost its file"));
                };
                let file = &lock.file;
                file.set_len(0).map_err(|err| io_error(err, &self.path))?;
                file.set_len((metadata.len() + data_len) as u64)
                    .map_err(|err| io_error(err, &self.path))?;
                let mut mmap = unsafe {
                    MmapMut::map_mut(file).map_err(|err| io_error(err, &self.path))?
                };
                mmap[..metadata.len()].copy_from_slice(&metadata);
                self.data_offset = metadata.len();
                self.backing = Backing::MappedMut(mmap);
            }
        }
        self.rows = rows;
        self.columns = columns;
        tracing::debug!(
            path = %self.path.display(),
            rows,
            columns,
            mode = self.cache_mode.name(),
            "allocated cifti matrix"
        );
        Ok(())
    }

    fn check_row(&self, len: usize, index: usize) -> Result<(), Error> {
        if matches!(self.backing, Backing::Pending) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("mapping model must be set before rows are accessed")
                .with_path(&self.path));
        }
        if len != self.columns {
            return Err(Error::new(ErrorKind::DimensionMismatch)
                .with_message(format!(
                    "row buffer holds {len} values, matrix rows have {}",
                    self.columns
                ))
                .with_path(&self.path)
                .with_row(index as u64));
        }
        if index >= self.rows {
            return Err(Error::new(ErrorKind::DimensionMismatch)
                .with_message(format!("row index is past the last row ({} rows)", self.rows))
                .with_path(&self.path)
                .with_row(index as u64));
        }
        Ok(())
    }

    pub fn get_row(&self, buf: &mut [f32], index: usize) -> Result<(), Error> {
        self.check_row(buf.len(), index)?;
        let start = index * self.columns;
        match &self.backing {
            Backing::Memory(values) => {
                buf.copy_from_slice(&values[start..start + self.columns]);
                if let Some((slope, inter)) = self.scaling {
                    for value in buf.iter_mut() {
                        *value = (*value as f64 * slope + inter) as f32;
                    }
                }
            }
            Backing::Mapped(mmap) => self.decode_row(mmap, start, buf),
            Backing::MappedMut(mmap) => self.decode_row(mmap, start, buf),
            Backing::Pending => {}
        }
        self.row_reads.set(self.row_reads.get() + 1);
        Ok(())
    }

    fn decode_row(&self, bytes: &[u8], start: usize, buf: &mut [f32]) {
        let begin = self.data_offset + start * VALUE_SIZE;
        let end = begin + self.columns * VALUE_SIZE;
        decode_values(&bytes[begin..end], self.byte_order, self.scaling, buf);
    }

    pub fn set_row(&mut self, buf: &[f32], index: usize) -> Result<(), Error> {
        if !self.writable {
            return Err(Error::new(ErrorKind::FileAccess)
                .with_message("cannot write rows through a read-only handle")
                .with_path(&self.path)
                .with_row(index as u64));
        }
        self.check_row(buf.len(), index)?;
        let start = index * self.columns;
        let columns = self.columns;
        match &mut self.backing {
            Backing::Memory(values) => values[start..start + columns].copy_from_slice(buf),
            Backing::MappedMut(mmap) => {
                let begin = self.data_offset + start * VALUE_SIZE;
                let end = begin + columns * VALUE_SIZE;
                encode_values(buf, self.byte_order, &mut mmap[begin..end]);
            }
            Backing::Mapped(_) | Backing::Pending => {}
        }
        self.rows_written = true;
        Ok(())
    }

    /// Reads column `index` one element per row; there is no native column storage.
    pub fn get_column(&self, buf: &mut [f32], index: usize) -> Result<(), Error> {
        if matches!(self.backing, Backing::Pending) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("mapping model must be set before columns are accessed")
                .with_path(&self.path));
        }
        if buf.len() != self.rows || index >= self.columns {
            return Err(Error::new(ErrorKind::DimensionMismatch)
                .with_message(format!(
                    "column {index} with buffer of {} does not fit a {}x{} matrix",
                    buf.len(),
                    self.rows,
                    self.columns
                ))
                .with_path(&self.path));
        }
        for (row, value) in buf.iter_mut().enumerate() {
            let element = row * self.columns + index;
            *value = match &self.backing {
                Backing::Memory(values) => match self.scaling {
                    Some((slope, inter)) => (values[element] as f64 * slope + inter) as f32,
                    None => values[element],
                },
                Backing::Mapped(mmap) => self.decode_element(mmap, element),
                Backing::MappedMut(mmap) => self.decode_element(mmap, element),
                Backing::Pending => 0.0,
            };
        }
        Ok(())
    }

    /// Writes column `index`, one element per row.
    pub fn set_column(&mut self, buf: &[f32], index: usize) -> Result<(), Error> {
        if !self.writable {
            return Err(Error::new(ErrorKind::FileAccess)
                .with_message("cannot write columns through a read-only handle")
                .with_path(&self.path));
        }
        if matches!(self.backing, Backing::Pending) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("mapping model must be set before columns are accessed")
                .with_path(&self.path));
        }
        if buf.len() != self.rows || index >= self.columns {
            return Err(Error::new(ErrorKind::DimensionMismatch)
                .with_message(format!(
                    "column {index} with buffer of {} does not fit a {}x{} matrix",
                    buf.len(),
                    self.rows,
                    self.columns
                ))
                .with_path(&self.path));
        }
        let columns = self.columns;
        match &mut self.backing {
            Backing::Memory(values) => {
                for (row, value) in buf.iter().enumerate() {
                    values[row * columns + index] = *value;
                }
            }
            Backing::MappedMut(mmap) => {
                for (row, value) in buf.iter().enumerate() {
                    let begin = self.data_offset + (row * columns + index) * VALUE_SIZE;
                    encode_values(
                        std::slice::from_ref(value),
                        self.byte_order,
                        &mut mmap[begin..begin + VALUE_SIZE],
                    );
                }
            }
            Backing::Mapped(_) | Backing::Pending => {}
        }
        self.rows_written = true;
        Ok(())
    }

    /// Moves the matrix into memory.
    ///
    /// A reader drops its map and its shared lock, so the same path can then
    /// be rewritten by a writer. A writer keeps its lock and writes the file
    /// on `finish`. Pending writers simply allocate in memory later.
    pub fn convert_to_in_memory(&mut self) -> Result<(), Error> {
        if self.cache_mode == CacheMode::InMemory {
            return Ok(());
        }
        let count = self.rows * self.columns;
        let values = match &self.backing {
            Backing::Pending => None,
            Backing::Memory(_) => None,
            Backing::Mapped(mmap) => Some(self.raw_values(mmap, count)),
            Backing::MappedMut(mmap) => Some(self.raw_values(mmap, count)),
        };
        if let Some(values) = values {
            self.backing = Backing::Memory(values);
        }
        if !self.writable {
            self.lock = None;
        }
        self.cache_mode = CacheMode::InMemory;
        tracing::debug!(path = %self.path.display(), rows = self.rows, "converted cifti matrix to memory");
        Ok(())
    }

    fn raw_values(&self, bytes: &[u8], count: usize) -> Vec<f32> {
        let mut values = vec![0f32; count];
        let end = self.data_offset + count * VALUE_SIZE;
        decode_values(&bytes[self.data_offset..end], self.byte_order, None, &mut values);
        values
    }

    fn decode_element(&self, bytes: &[u8], element: usize) -> f32 {
        let mut value = [0f32; 1];
        let begin = self.data_offset + element * VALUE_SIZE;
        decode_values(&bytes[begin..begin + VALUE_SIZE], self.byte_order, self.scaling, &mut value);
        value[0]
    }

    /// Completes a writer: flushes the map, or writes the in-memory matrix out.
    pub fn finish(mut self) -> Result<(), Error> {
        self.finished = true;
        if !self.writable {
            return Ok(());
        }
        let path = self.path.clone();
        match &self.backing {
            Backing::Pending => Err(Error::new(ErrorKind::Usage)
                .with_message("no mapping model was set before finishing")
                .with_path(&path)),
            Backing::MappedMut(mmap) => mmap.flush().map_err(|err| io_error(err, &path)),
            Backing::Memory(values) => {
                let xml = self.cifti_xml()?;
                let metadata = encode_metadata(xml, self.byte_order, None)?;
                let Some(lock) = &self.lock else {
                    return Err(Error::new(ErrorKind::Internal).with_message("writer lost its file"));
                };
                write_file(&lock.file, &metadata, values, self.byte_order)
                    .map_err(|err| io_error(err, &path))
            }
            Backing::Mapped(_) => Ok(()),
        }?;
        tracing::debug!(path = %path.display(), rows = self.rows, columns = self.columns, "finished cifti matrix");
        Ok(())
    }
}

impl std::fmt::Debug for CiftiMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CiftiMatrix")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .field("columns", &self.columns)
            .field("cache_mode", &self.cache_mode)
            .field("writable", &self.writable)
            .finish()
    }
}

impl Drop for CiftiMatrix {
    fn drop(&mut self) {
        if self.writable && !self.finished && matches!(self.backing, Backing::Memory(_)) {
            tracing::warn!(
                path = %self.path.display(),
                "in-memory matrix dropped without finish; nothing was written"
            );
        }
    }
}

fn data_len(rows: usize, columns: usize) -> Result<usize, Error> {
    rows.checked_mul(columns)
        .and_then(|count| count.checked_mul(VALUE_SIZE))
        .ok_or_else(|| {
            Error::new(ErrorKind::Format)
                .with_message(format!("matrix of {rows}x{columns} is too large to address"))
        })
}

/// Header plus extensions; `capacity` pads the XML to fill an existing slot.
fn encode_metadata(xml: &CiftiXml, order: ByteOrder, capacity: Option<usize>) -> Result<Vec<u8>, Error> {
    let mut data = xml.to_xml_string()?.into_bytes();
    if let Some(capacity) = capacity {
        // extender + 8-byte extension header
        let room = capacity.saturating_sub(EXTENDER_SIZE + 8);
        if data.len() <= room {
            data.resize(room, 0);
        }
    }
    let extensions = encode_extensions(
        &[Extension {
            code: CIFTI_EXTENSION_CODE,
            data,
        }],
        order,
    );
    let data_offset = HEADER_SIZE + extensions.len();
    let header = NiftiHeader::for_matrix(
        xml.number_of_rows(),
        xml.number_of_columns(),
        xml.intent(),
        data_offset as u64,
        order,
    );
    let mut out = Vec::with_capacity(data_offset);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&extensions);
    Ok(out)
}

fn decode_values(bytes: &[u8], order: ByteOrder, scaling: Option<(f64, f64)>, out: &mut [f32]) {
    order.read_f32_into(bytes, out);
    if let Some((slope, inter)) = scaling {
        for value in out.iter_mut() {
            *value = (*value as f64 * slope + inter) as f32;
        }
    }
}

fn encode_values(values: &[f32], order: ByteOrder, out: &mut [u8]) {
    order.write_f32_into(values, out);
}

const WRITE_CHUNK_VALUES: usize = 16 * 1024;

fn write_file(file: &File, metadata: &[u8], values: &[f32], order: ByteOrder) -> io::Result<()> {
    file.set_len(0)?;
    let mut writer = BufWriter::new(file);
    writer.seek(SeekFrom::Start(0))?;
    writer.write_all(metadata)?;
    let mut scratch = vec![0u8; WRITE_CHUNK_VALUES.min(values.len()) * VALUE_SIZE];
    for chunk in values.chunks(WRITE_CHUNK_VALUES) {
        let bytes = &mut scratch[..chunk.len() * VALUE_SIZE];
        encode_values(chunk, order, bytes);
        writer.write_all(bytes)?;
    }
    writer.flush()
}

fn read_header(file: &mut File, path: &Path, actual_size: u64) -> Result<NiftiHeader, Error> {
    if actual_size < (HEADER_SIZE + EXTENDER_SIZE) as u64 {
        return Err(Error::new(ErrorKind::Format)
            .with_message("file is too small for a NIFTI-2 header"));
    }
    let mut buf = [0u8; HEADER_SIZE];
    file.seek(SeekFrom::Start(0))
        .map_err(|err| io_error(err, path))?;
    file.read_exact(&mut buf).map_err(|err| io_error(err, path))?;
    NiftiHeader::decode(&buf)
}

fn io_error(err: io::Error, path: &Path) -> Error {
    Error::new(ErrorKind::FileAccess)
        .with_path(path)
        .with_source(err)
}

fn lock_error(err: io::Error, path: &Path) -> Error {
    Error::new(ErrorKind::FileAccess)
        .with_message(lock_error_message(&err))
        .with_path(path)
        .with_source(err)
}

fn lock_error_message(err: &io::Error) -> &'static str {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EPERM {
        return "permission denied while locking matrix file";
    }
    if errno == EACCES || err.kind() == io::ErrorKind::WouldBlock {
        return "matrix file is in use by another handle";
    }
    "failed to lock matrix file"
}
