// NIFTI-2 header and extension codec for CIFTI-2 matrix files.
use byteorder::{BigEndian, ByteOrder as Endian, LittleEndian};

use crate::core::error::{Error, ErrorKind};

pub const HEADER_SIZE: usize = 540;
pub const EXTENDER_SIZE: usize = 4;
pub const CIFTI_EXTENSION_CODE: i32 = 32;
pub const DT_FLOAT32: i16 = 16;

const NIFTI1_HEADER_SIZE: i32 = 348;
const MAGIC: [u8; 8] = *b"n+2\0\r\n\x1a\n";
const EXTENSION_HEADER_SIZE: usize = 8;
const EXTENSION_ALIGN: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn name(self) -> &'static str {
        match self {
            ByteOrder::Little => "little",
            ByteOrder::Big => "big",
        }
    }

    /// Decodes `dst.len()` float32 values; `src` must hold exactly that many.
    pub fn read_f32_into(self, src: &[u8], dst: &mut [f32]) {
        match self {
            ByteOrder::Little => LittleEndian::read_f32_into(src, dst),
            ByteOrder::Big => BigEndian::read_f32_into(src, dst),
        }
    }

    pub fn write_f32_into(self, src: &[f32], dst: &mut [u8]) {
        match self {
            ByteOrder::Little => LittleEndian::write_f32_into(src, dst),
            ByteOrder::Big => BigEndian::write_f32_into(src, dst),
        }
    }

    fn read_i16(self, buf: &[u8], offset: usize) -> i16 {
        let field = &buf[offset..offset + 2];
        match self {
            ByteOrder::Little => LittleEndian::read_i16(field),
            ByteOrder::Big => BigEndian::read_i16(field),
        }
    }

    fn read_i32(self, buf: &[u8], offset: usize) -> i32 {
        let field = &buf[offset..offset + 4];
        match self {
            ByteOrder::Little => LittleEndian::read_i32(field),
            ByteOrder::Big => BigEndian::read_i32(field),
        }
    }

    fn read_i64(self, buf: &[u8], offset: usize) -> i64 {
        let field = &buf[offset..offset + 8];
        match self {
            ByteOrder::Little => LittleEndian::read_i64(field),
            ByteOrder::Big => BigEndian::read_i64(field),
        }
    }

    fn read_f64(self, buf: &[u8], offset: usize) -> f64 {
        let field = &buf[offset..offset + 8];
        match self {
            ByteOrder::Little => LittleEndian::read_f64(field),
            ByteOrder::Big => BigEndian::read_f64(field),
        }
    }

    fn write_i16(self, buf: &mut [u8], offset: usize, value: i16) {
        let field = &mut buf[offset..offset + 2];
        match self {
            ByteOrder::Little => LittleEndian::write_i16(field, value),
            ByteOrder::Big => BigEndian::write_i16(field, value),
        }
    }

    fn write_i32(self, buf: &mut [u8], offset: usize, value: i32) {
        let field = &mut buf[offset..offset + 4];
        match self {
            ByteOrder::Little => LittleEndian::write_i32(field, value),
            ByteOrder::Big => BigEndian::write_i32(field, value),
        }
    }

    fn write_i64(self, buf: &mut [u8], offset: usize, value: i64) {
        let field = &mut buf[offset..offset + 8];
        match self {
            ByteOrder::Little => LittleEndian::write_i64(field, value),
            ByteOrder::Big => BigEndian::write_i64(field, value),
        }
    }

    fn write_f64(self, buf: &mut [u8], offset: usize, value: f64) {
        let field = &mut buf[offset..offset + 8];
        match self {
            ByteOrder::Little => LittleEndian::write_f64(field, value),
            ByteOrder::Big => BigEndian::write_f64(field, value),
        }
    }
}

/// CIFTI-2 intent codes carried in the NIFTI-2 header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Intent {
    ConnUnknown,
    ConnDense,
    ConnDenseSeries,
    ConnParcels,
    ConnParcelSeries,
    ConnDenseTrajectory,
    ConnDenseScalar,
    ConnDenseLabel,
    ConnParcelScalar,
    ConnParcelDense,
    ConnDenseParcel,
    ConnParcelParcelSeries,
    ConnParcelParcelScalar,
}

const INTENTS: [(Intent, i32, &str); 13] = [
    (Intent::ConnUnknown, 3000, "ConnUnknown"),
    (Intent::ConnDense, 3001, "ConnDense"),
    (Intent::ConnDenseSeries, 3002, "ConnDenseSeries"),
    (Intent::ConnParcels, 3003, "ConnParcels"),
    (Intent::ConnParcelSeries, 3004, "ConnParcelSries"),
    (Intent::ConnDenseTrajectory, 3005, "ConnDenseTraj"),
    (Intent::ConnDenseScalar, 3006, "ConnDenseScalar"),
    (Intent::ConnDenseLabel, 3007, "ConnDenseLabel"),
    (Intent::ConnParcelScalar, 3008, "ConnParcelScalr"),
    (Intent::ConnParcelDense, 3009, "ConnParcelDense"),
    (Intent::ConnDenseParcel, 3010, "ConnDenseParcel"),
    (Intent::ConnParcelParcelSeries, 3011, "ConnPPSr"),
    (Intent::ConnParcelParcelScalar, 3012, "ConnPPSc"),
];

impl Intent {
    pub fn from_code(code: i32) -> Option<Self> {
        INTENTS
            .iter()
            .find(|(_, value, _)| *value == code)
            .map(|(intent, _, _)| *intent)
    }

    pub fn code(self) -> i32 {
        INTENTS
            .iter()
            .find(|(intent, _, _)| *intent == self)
            .map(|(_, code, _)| *code)
            .unwrap_or(3000)
    }

    pub fn name(self) -> &'static str {
        INTENTS
            .iter()
            .find(|(intent, _, _)| *intent == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("ConnUnknown")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NiftiHeader {
    pub byte_order: ByteOrder,
    pub datatype: i16,
    pub bitpix: i16,
    pub dim: [i64; 8],
    pub pixdim: [f64; 8],
    pub vox_offset: i64,
    pub scl_slope: f64,
    pub scl_inter: f64,
    pub xyzt_units: i32,
    pub intent_code: i32,
    pub intent_name: [u8; 16],
    pub descrip: [u8; 80],
}

impl NiftiHeader {
    /// Header for a float32 CIFTI matrix of `rows` x `columns`.
    pub fn for_matrix(
        rows: usize,
        columns: usize,
        intent: Intent,
        vox_offset: u64,
        byte_order: ByteOrder,
    ) -> Self {
        let mut dim = [1i64; 8];
        dim[0] = 6;
        dim[5] = columns as i64;
        dim[6] = rows as i64;
        let mut pixdim = [1.0f64; 8];
        pixdim[0] = 0.0;
        let mut intent_name = [0u8; 16];
        copy_str(&mut intent_name, intent.name());
        Self {
            byte_order,
            datatype: DT_FLOAT32,
            bitpix: 32,
            dim,
            pixdim,
            vox_offset: vox_offset as i64,
            scl_slope: 1.0,
            scl_inter: 0.0,
            xyzt_units: 0,
            intent_code: intent.code(),
            intent_name,
            descrip: [0u8; 80],
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let order = self.byte_order;
        let mut buf = [0u8; HEADER_SIZE];
        order.write_i32(&mut buf, 0, HEADER_SIZE as i32);
        buf[4..12].copy_from_slice(&MAGIC);
        order.write_i16(&mut buf, 12, self.datatype);
        order.write_i16(&mut buf, 14, self.bitpix);
        for (idx, value) in self.dim.iter().enumerate() {
            order.write_i64(&mut buf, 16 + idx * 8, *value);
        }
        for (idx, value) in self.pixdim.iter().enumerate() {
            order.write_f64(&mut buf, 104 + idx * 8, *value);
        }
        order.write_i64(&mut buf, 168, self.vox_offset);
        order.write_f64(&mut buf, 176, self.scl_slope);
        order.write_f64(&mut buf, 184, self.scl_inter);
        buf[240..320].copy_from_slice(&self.descrip);
        order.write_i32(&mut buf, 500, self.xyzt_units);
        order.write_i32(&mut buf, 504, self.intent_code);
        buf[508..524].copy_from_slice(&self.intent_name);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::new(ErrorKind::Format).with_message("file too small for a NIFTI-2 header"));
        }
        let byte_order = detect_byte_order(buf)?;
        if buf[4..12] != MAGIC {
            return Err(Error::new(ErrorKind::Format)
                .with_message("bad NIFTI-2 magic")
                .with_offset(4));
        }

        let mut dim = [0i64; 8];
        for (idx, value) in dim.iter_mut().enumerate() {
            *value = byte_order.read_i64(buf, 16 + idx * 8);
        }
        let mut pixdim = [0f64; 8];
        for (idx, value) in pixdim.iter_mut().enumerate() {
            *value = byte_order.read_f64(buf, 104 + idx * 8);
        }
        let mut intent_name = [0u8; 16];
        intent_name.copy_from_slice(&buf[508..524]);
        let mut descrip = [0u8; 80];
        descrip.copy_from_slice(&buf[240..320]);

        Ok(Self {
            byte_order,
            datatype: byte_order.read_i16(buf, 12),
            bitpix: byte_order.read_i16(buf, 14),
            dim,
            pixdim,
            vox_offset: byte_order.read_i64(buf, 168),
            scl_slope: byte_order.read_f64(buf, 176),
            scl_inter: byte_order.read_f64(buf, 184),
            xyzt_units: byte_order.read_i32(buf, 500),
            intent_code: byte_order.read_i32(buf, 504),
            intent_name,
            descrip,
        })
    }

    /// Checks the CIFTI-2 matrix constraints and returns (rows, columns).
    pub fn validate(&self) -> Result<(usize, usize), Error> {
        if self.datatype != DT_FLOAT32 || self.bitpix != 32 {
            return Err(Error::new(ErrorKind::Format).with_message(format!(
                "unsupported datatype {} (bitpix {}), only float32 matrices are supported",
                self.datatype, self.bitpix
            )));
        }
        let Some(intent) = Intent::from_code(self.intent_code) else {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("unrecognized intent code {}", self.intent_code)));
        };
        if self.dim[0] != 6 {
            return Err(Error::new(ErrorKind::Format).with_message(format!(
                "{} file has {} dimensions, expected a 2-D CIFTI matrix",
                intent.name(),
                self.dim[0]
            )));
        }
        if self.dim[1..5].iter().any(|value| *value != 1) {
            return Err(Error::new(ErrorKind::Format)
                .with_message("CIFTI spatial dimensions must all be 1"));
        }
        let columns = self.dim[5];
        let rows = self.dim[6];
        if rows < 1 || columns < 1 {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("invalid matrix dimensions {rows}x{columns}")));
        }
        let min_offset = (HEADER_SIZE + EXTENDER_SIZE) as i64;
        if self.vox_offset < min_offset {
            return Err(Error::new(ErrorKind::Format)
                .with_message("vox_offset precedes the header extensions")
                .with_offset(168));
        }
        Ok((rows as usize, columns as usize))
    }

    /// Scale and intercept to apply on read, if they are not the identity.
    pub fn scaling(&self) -> Option<(f64, f64)> {
        let slope = self.scl_slope;
        if slope == 0.0 || !slope.is_finite() {
            return None;
        }
        if slope == 1.0 && self.scl_inter == 0.0 {
            return None;
        }
        Some((slope, self.scl_inter))
    }

    pub fn intent(&self) -> Option<Intent> {
        Intent::from_code(self.intent_code)
    }
}

fn detect_byte_order(buf: &[u8]) -> Result<ByteOrder, Error> {
    let little = LittleEndian::read_i32(&buf[0..4]);
    let big = BigEndian::read_i32(&buf[0..4]);
    if little == HEADER_SIZE as i32 {
        return Ok(ByteOrder::Little);
    }
    if big == HEADER_SIZE as i32 {
        return Ok(ByteOrder::Big);
    }
    if little == NIFTI1_HEADER_SIZE || big == NIFTI1_HEADER_SIZE {
        return Err(Error::new(ErrorKind::Format)
            .with_message("NIFTI-1 files are not supported, CIFTI-2 requires NIFTI-2"));
    }
    Err(Error::new(ErrorKind::Format)
        .with_message(format!("invalid sizeof_hdr {little}"))
        .with_offset(0))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
    pub code: i32,
    pub data: Vec<u8>,
}

/// Size on disk of an extension with `payload_len` payload bytes.
pub fn extension_size(payload_len: usize) -> usize {
    let raw = EXTENSION_HEADER_SIZE + payload_len;
    raw.div_ceil(EXTENSION_ALIGN) * EXTENSION_ALIGN
}

/// Encodes the extender flag and every extension, padding payloads with NULs.
pub fn encode_extensions(extensions: &[Extension], order: ByteOrder) -> Vec<u8> {
    let mut out = vec![0u8; EXTENDER_SIZE];
    if extensions.is_empty() {
        return out;
    }
    out[0] = 1;
    for extension in extensions {
        let size = extension_size(extension.data.len());
        let start = out.len();
        out.resize(start + size, 0);
        order.write_i32(&mut out, start, size as i32);
        order.write_i32(&mut out, start + 4, extension.code);
        let payload = start + EXTENSION_HEADER_SIZE;
        out[payload..payload + extension.data.len()].copy_from_slice(&extension.data);
    }
    out
}

/// Decodes extensions from the bytes between the end of the header and `vox_offset`.
pub fn decode_extensions(buf: &[u8], order: ByteOrder) -> Result<Vec<Extension>, Error> {
    if buf.len() < EXTENDER_SIZE {
        return Err(Error::new(ErrorKind::Format)
            .with_message("missing extension flag")
            .with_offset(HEADER_SIZE as u64));
    }
    let mut extensions = Vec::new();
    if buf[0] == 0 {
        return Ok(extensions);
    }
    let mut pos = EXTENDER_SIZE;
    while pos + EXTENSION_HEADER_SIZE <= buf.len() {
        let size = order.read_i32(buf, pos);
        let code = order.read_i32(buf, pos + 4);
        let file_offset = (HEADER_SIZE + pos) as u64;
        if size < EXTENSION_HEADER_SIZE as i32 || size as usize % EXTENSION_ALIGN != 0 {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("invalid extension size {size}"))
                .with_offset(file_offset));
        }
        let end = pos + size as usize;
        if end > buf.len() {
            return Err(Error::new(ErrorKind::Format)
                .with_message("extension runs past vox_offset")
                .with_offset(file_offset));
        }
        extensions.push(Extension {
            code,
            data: buf[pos + EXTENSION_HEADER_SIZE..end].to_vec(),
        });
        pos = end;
    }
    Ok(extensions)
}

/// Returns the CIFTI XML text carried by the first code-32 extension.
pub fn cifti_xml_text(extensions: &[Extension]) -> Result<String, Error> {
    let Some(extension) = extensions
        .iter()
        .find(|extension| extension.code == CIFTI_EXTENSION_CODE)
    else {
        return Err(Error::new(ErrorKind::Format).with_message("no CIFTI extension found"));
    };
    let end = extension
        .data
        .iter()
        .rposition(|byte| *byte != 0)
        .map(|idx| idx + 1)
        .unwrap_or(0);
    String::from_utf8(extension.data[..end].to_vec()).map_err(|err| {
        Error::new(ErrorKind::Format)
            .with_message("CIFTI extension is not valid UTF-8")
            .with_source(err)
    })
}

fn copy_str(dest: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(dest.len());
    dest[..len].copy_from_slice(&bytes[..len]);
}
