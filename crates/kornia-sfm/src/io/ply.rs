use std::io::BufRead;
use std::path::Path;

/// Error types for the PLY module.
#[derive(Debug, thiserror::Error)]
pub enum PlyError {
    /// Failed to read PLY file
    #[error("Failed to read PLY file")]
    Io(#[from] std::io::Error),

    /// Malformed header
    #[error("Invalid PLY header: {0}")]
    InvalidHeader(String),

    /// Unsupported PLY format or layout
    #[error("Unsupported PLY format: {0}")]
    UnsupportedFormat(String),

    /// Unsupported PLY property
    #[error("Unsupported PLY property: {0}")]
    UnsupportedProperty(String),

    /// The vertex element lacks one of the x, y, z properties
    #[error("PLY vertex element has no x, y, z properties")]
    MissingCoordinates,

    /// Vertex data could not be decoded
    #[error("Invalid PLY vertex data: {0}")]
    InvalidData(String),
}

/// Encoding of the PLY body.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlyFormat {
    /// Whitespace separated text, one vertex per line.
    Ascii,
    /// Packed little endian records.
    BinaryLittleEndian,
}

/// Scalar property types.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlyDataType {
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// 8-bit signed integer
    Int8,
    /// 8-bit unsigned integer
    UInt8,
    /// 16-bit signed integer
    Int16,
    /// 16-bit unsigned integer
    UInt16,
    /// 32-bit signed integer
    Int32,
    /// 32-bit unsigned integer
    UInt32,
}

impl PlyDataType {
    /// Size in bytes of a binary value.
    pub fn size(&self) -> usize {
        match self {
            PlyDataType::Float32 | PlyDataType::Int32 | PlyDataType::UInt32 => 4,
            PlyDataType::Float64 => 8,
            PlyDataType::Int16 | PlyDataType::UInt16 => 2,
            PlyDataType::Int8 | PlyDataType::UInt8 => 1,
        }
    }

    // PRECONDITION: bytes.len() == self.size()
    fn read_le(&self, bytes: &[u8]) -> f64 {
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        match self {
            PlyDataType::Float32 => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            PlyDataType::Float64 => f64::from_le_bytes(buf),
            PlyDataType::Int8 => buf[0] as i8 as f64,
            PlyDataType::UInt8 => buf[0] as f64,
            PlyDataType::Int16 => i16::from_le_bytes([buf[0], buf[1]]) as f64,
            PlyDataType::UInt16 => u16::from_le_bytes([buf[0], buf[1]]) as f64,
            PlyDataType::Int32 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            PlyDataType::UInt32 => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
        }
    }
}

/// A scalar property of the vertex element.
#[derive(Debug, PartialEq, Clone)]
pub struct PlyPropertyDefinition {
    /// Property name
    pub name: String,
    /// Property type
    pub data_type: PlyDataType,
}

struct PlyHeader {
    format: PlyFormat,
    vertex_count: usize,
    properties: Vec<PlyPropertyDefinition>,
}

fn parse_data_type(type_str: &str) -> Result<PlyDataType, PlyError> {
    match type_str {
        "float" | "float32" => Ok(PlyDataType::Float32),
        "double" | "float64" => Ok(PlyDataType::Float64),
        "char" | "int8" => Ok(PlyDataType::Int8),
        "uchar" | "uint8" => Ok(PlyDataType::UInt8),
        "short" | "int16" => Ok(PlyDataType::Int16),
        "ushort" | "uint16" => Ok(PlyDataType::UInt16),
        "int" | "int32" => Ok(PlyDataType::Int32),
        "uint" | "uint32" => Ok(PlyDataType::UInt32),
        other => Err(PlyError::UnsupportedProperty(other.to_string())),
    }
}

fn parse_header<R: BufRead>(reader: &mut R) -> Result<PlyHeader, PlyError> {
    let mut line = String::new();
    let mut format = None;
    let mut vertex_count = None;
    let mut in_vertex = false;
    let mut properties = Vec::new();

    if reader.read_line(&mut line)? == 0 || line.trim() != "ply" {
        return Err(PlyError::InvalidHeader("missing 'ply' magic".to_string()));
    }

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(PlyError::InvalidHeader("missing 'end_header'".to_string()));
        }
        let parts = line.split_whitespace().collect::<Vec<_>>();

        match parts.as_slice() {
            ["end_header"] => break,
            ["format", "ascii", ..] => format = Some(PlyFormat::Ascii),
            ["format", "binary_little_endian", ..] => format = Some(PlyFormat::BinaryLittleEndian),
            ["format", other, ..] => return Err(PlyError::UnsupportedFormat(other.to_string())),
            ["element", "vertex", count] => {
                let count = count
                    .parse()
                    .map_err(|_| PlyError::InvalidHeader(format!("invalid vertex count {count}")))?;
                vertex_count = Some(count);
                in_vertex = true;
            }
            ["element", name, ..] => {
                // the vertex data must come first so the body can be read sequentially
                if vertex_count.is_none() {
                    return Err(PlyError::UnsupportedFormat(format!(
                        "element '{name}' precedes the vertex element"
                    )));
                }
                in_vertex = false;
            }
            ["property", "list", ..] if in_vertex => {
                return Err(PlyError::UnsupportedProperty(
                    "list property in vertex element".to_string(),
                ))
            }
            ["property", data_type, name] if in_vertex => {
                properties.push(PlyPropertyDefinition {
                    name: name.to_string(),
                    data_type: parse_data_type(data_type)?,
                });
            }
            _ => {}
        }
    }

    let format = format.ok_or_else(|| PlyError::InvalidHeader("missing format".to_string()))?;
    let vertex_count = vertex_count
        .ok_or_else(|| PlyError::InvalidHeader("missing vertex element".to_string()))?;

    Ok(PlyHeader {
        format,
        vertex_count,
        properties,
    })
}

/// Read the vertex positions of a PLY file.
///
/// Supports `ascii` and `binary_little_endian` files whose `vertex` element comes
/// first and holds scalar properties including `x`, `y` and `z`. Other properties and
/// any element following the vertices are ignored.
///
/// # Arguments
///
/// * `path` - Path to the PLY file.
pub fn read_ply_points(path: impl AsRef<Path>) -> Result<Vec<[f64; 3]>, PlyError> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    read_ply_points_from(&mut reader)
}

/// Read the vertex positions of a PLY stream, see [`read_ply_points`].
pub fn read_ply_points_from<R: BufRead>(reader: &mut R) -> Result<Vec<[f64; 3]>, PlyError> {
    let header = parse_header(reader)?;

    let index_of = |name: &str| header.properties.iter().position(|p| p.name == name);
    let xyz = match (index_of("x"), index_of("y"), index_of("z")) {
        (Some(x), Some(y), Some(z)) => [x, y, z],
        _ => return Err(PlyError::MissingCoordinates),
    };

    let mut points = Vec::with_capacity(header.vertex_count);

    match header.format {
        PlyFormat::Ascii => {
            let mut line = String::new();
            while points.len() < header.vertex_count {
                line.clear();
                if reader.read_line(&mut line)? == 0 {
                    return Err(PlyError::InvalidData(format!(
                        "expected {} vertices, found {}",
                        header.vertex_count,
                        points.len()
                    )));
                }
                let values = line.split_whitespace().collect::<Vec<_>>();
                if values.is_empty() {
                    continue;
                }
                if values.len() < header.properties.len() {
                    return Err(PlyError::InvalidData(format!(
                        "vertex {} has {} values, expected {}",
                        points.len(),
                        values.len(),
                        header.properties.len()
                    )));
                }
                let mut point = [0.0; 3];
                for (dst, &idx) in point.iter_mut().zip(xyz.iter()) {
                    *dst = values[idx].parse::<f64>().map_err(|_| {
                        PlyError::InvalidData(format!("invalid number '{}'", values[idx]))
                    })?;
                }
                points.push(point);
            }
        }
        PlyFormat::BinaryLittleEndian => {
            let offsets = header
                .properties
                .iter()
                .scan(0, |offset, p| {
                    let start = *offset;
                    *offset += p.data_type.size();
                    Some(start)
                })
                .collect::<Vec<_>>();
            let record_size = header.properties.iter().map(|p| p.data_type.size()).sum();

            let mut buffer = vec![0u8; record_size];
            for _ in 0..header.vertex_count {
                reader.read_exact(&mut buffer)?;
                let mut point = [0.0; 3];
                for (dst, &idx) in point.iter_mut().zip(xyz.iter()) {
                    let data_type = header.properties[idx].data_type;
                    let start = offsets[idx];
                    *dst = data_type.read_le(&buffer[start..start + data_type.size()]);
                }
                points.push(point);
            }
        }
    }

    Ok(points)
}
