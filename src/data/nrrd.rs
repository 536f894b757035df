//! Minimal NRRD support: attached raw or gzip data, 3-D, scalar voxels.
//!
//! Axis order follows the format: the first entry of `sizes` is the fastest
//! varying axis, so `sizes: x y z` maps to a `Volume` of dims `[z, y, x]`.

use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use anyhow::{anyhow, bail, ensure, Context, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::data::volume::Volume;

const MAGIC: &str = "NRRD000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
    Double,
}

impl ScalarType {
    fn parse(name: &str) -> Result<Self> {
        let kind = match name.trim() {
            "signed char" | "int8" | "int8_t" => Self::Int8,
            "uchar" | "unsigned char" | "uint8" | "uint8_t" => Self::Uint8,
            "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
                Self::Int16
            }
            "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
                Self::Uint16
            }
            "int" | "signed int" | "int32" | "int32_t" => Self::Int32,
            "uint" | "unsigned int" | "uint32" | "uint32_t" => Self::Uint32,
            "float" => Self::Float,
            "double" => Self::Double,
            other => bail!("Unsupported NRRD type '{}'", other),
        };
        Ok(kind)
    }

    fn width(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float => 4,
            Self::Double => 8,
        }
    }

    fn decode(self, bytes: &[u8], big_endian: bool) -> f32 {
        macro_rules! read {
            ($t:ty) => {{
                let raw = bytes.try_into().unwrap_or_default();
                if big_endian {
                    <$t>::from_be_bytes(raw) as f32
                } else {
                    <$t>::from_le_bytes(raw) as f32
                }
            }};
        }
        match self {
            Self::Int8 => bytes[0] as i8 as f32,
            Self::Uint8 => bytes[0] as f32,
            Self::Int16 => read!(i16),
            Self::Uint16 => read!(u16),
            Self::Int32 => read!(i32),
            Self::Uint32 => read!(u32),
            Self::Float => read!(f32),
            Self::Double => read!(f64),
        }
    }
}

/// Payload encoding of an NRRD file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Gzip,
}

impl Encoding {
    fn parse(name: &str) -> Result<Self> {
        match name.trim() {
            "raw" => Ok(Self::Raw),
            "gzip" | "gz" => Ok(Self::Gzip),
            other => bail!("Unsupported NRRD encoding '{}'", other),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Gzip => "gzip",
        }
    }
}

#[derive(Debug)]
struct Header {
    scalar: ScalarType,
    sizes: Vec<usize>,
    big_endian: bool,
    encoding: Encoding,
}

fn parse_header(text: &str) -> Result<Header> {
    let mut lines = text.lines();
    let magic = lines.next().unwrap_or_default();
    ensure!(magic.starts_with(MAGIC), "Not an NRRD file (magic '{}')", magic);

    let mut scalar = None;
    let mut dimension = None;
    let mut sizes = None;
    let mut encoding = None;
    let mut big_endian = false;

    for line in lines {
        if line.starts_with('#') || line.contains(":=") {
            continue;
        }
        let Some((field, value)) = line.split_once(": ") else {
            continue;
        };
        match field.trim() {
            "type" => scalar = Some(ScalarType::parse(value)?),
            "dimension" => {
                dimension = Some(value.trim().parse::<usize>().context("Invalid NRRD dimension")?)
            }
            "sizes" => {
                let parsed = value
                    .split_whitespace()
                    .map(|s| s.parse::<usize>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .context("Invalid NRRD sizes")?;
                sizes = Some(parsed);
            }
            "encoding" => encoding = Some(Encoding::parse(value)?),
            "endian" => big_endian = value.trim() == "big",
            "data file" | "datafile" => bail!("Detached NRRD data files are not supported"),
            _ => {}
        }
    }

    let scalar = scalar.context("NRRD header has no type field")?;
    let sizes = sizes.context("NRRD header has no sizes field")?;
    let dimension = dimension.context("NRRD header has no dimension field")?;
    ensure!(
        dimension == sizes.len(),
        "NRRD dimension {} disagrees with {} sizes",
        dimension,
        sizes.len()
    );
    ensure!(dimension == 3, "Expected a 3-D NRRD volume, got {} axes", dimension);

    let encoding = encoding.context("NRRD header has no encoding field")?;

    Ok(Header {
        scalar,
        sizes,
        big_endian,
        encoding,
    })
}

/// Split the file at the first blank line, LF or CRLF terminated.
fn split_header(bytes: &[u8]) -> Result<(&str, &[u8])> {
    let (end, payload_start) = bytes
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'\n')
        .find_map(|(i, _)| match &bytes[i + 1..] {
            [b'\n', ..] => Some((i, i + 2)),
            [b'\r', b'\n', ..] => Some((i, i + 3)),
            _ => None,
        })
        .ok_or_else(|| anyhow!("NRRD header is not terminated by a blank line"))?;

    let header = std::str::from_utf8(&bytes[..end]).context("NRRD header is not valid text")?;
    Ok((header, &bytes[payload_start..]))
}

/// Decode a volume from an in-memory NRRD file.
pub fn decode_volume(bytes: &[u8]) -> Result<Volume> {
    let (text, payload) = split_header(bytes)?;
    let header = parse_header(text)?;

    let inflated;
    let payload = match header.encoding {
        Encoding::Raw => payload,
        Encoding::Gzip => {
            let mut buffer = Vec::new();
            GzDecoder::new(payload)
                .read_to_end(&mut buffer)
                .context("Failed to inflate gzip NRRD payload")?;
            inflated = buffer;
            &inflated[..]
        }
    };

    let count: usize = header.sizes.iter().product();
    let width = header.scalar.width();
    ensure!(
        payload.len() >= count * width,
        "NRRD payload holds {} bytes, expected {}",
        payload.len(),
        count * width
    );

    let data = payload[..count * width]
        .chunks_exact(width)
        .map(|chunk| header.scalar.decode(chunk, header.big_endian))
        .collect();

    Volume::new([header.sizes[2], header.sizes[1], header.sizes[0]], data)
}

pub fn read_volume(path: &Path) -> Result<Volume> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    decode_volume(&bytes).with_context(|| format!("Failed to decode {}", path.display()))
}

/// Write `volume` as a little-endian float NRRD.
pub fn write_volume(path: &Path, volume: &Volume, encoding: Encoding) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let [depth, height, width] = volume.dims();

    write!(
        writer,
        "NRRD0004\n\
         # Complete NRRD file format documentation at:\n\
         # http://teem.sourceforge.net/nrrd/format.html\n\
         type: float\n\
         dimension: 3\n\
         sizes: {} {} {}\n\
         endian: little\n\
         encoding: {}\n\n",
        width,
        height,
        depth,
        encoding.name()
    )?;

    let payload: Vec<u8> = volume.data().iter().flat_map(|v| v.to_le_bytes()).collect();
    match encoding {
        Encoding::Raw => writer.write_all(&payload)?,
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(&mut writer, Compression::default());
            encoder.write_all(&payload)?;
            encoder.finish()?;
        }
    }
    writer.flush().with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_preserves_voxels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.nrrd");
        let volume = Volume::new([2, 3, 4], (0..24).map(|i| i as f32 * 0.5 - 3.0).collect()).unwrap();

        write_volume(&path, &volume, Encoding::Raw).unwrap();
        let loaded = read_volume(&path).unwrap();

        assert_eq!(loaded, volume);
    }

    #[test]
    fn test_gzip_write_then_read_preserves_voxels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.nrrd");
        let volume = Volume::new([3, 2, 4], (0..24).map(|i| (i % 5) as f32 - 2.5).collect()).unwrap();

        write_volume(&path, &volume, Encoding::Gzip).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert!(bytes.windows(15).any(|w| w == b"encoding: gzip\n"));

        assert_eq!(read_volume(&path).unwrap(), volume);
    }

    #[test]
    fn test_decodes_gz_uint8_written_elsewhere() {
        let mut bytes = b"NRRD0004\ntype: uint8\ndimension: 3\nsizes: 2 2 1\nencoding: gz\n\n".to_vec();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&[4, 3, 2, 1]).unwrap();
        bytes.extend(encoder.finish().unwrap());

        let volume = decode_volume(&bytes).unwrap();
        assert_eq!(volume.dims(), [1, 2, 2]);
        assert_eq!(volume.data(), &[4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_crlf_header_ends_at_first_blank_line() {
        let mut bytes = b"NRRD0004\r\ntype: uchar\r\ndimension: 3\r\nsizes: 4 1 1\r\nencoding: raw\r\n\r\n".to_vec();
        // payload holds two consecutive line feeds
        bytes.extend_from_slice(&[1, 10, 10, 2]);

        let volume = decode_volume(&bytes).unwrap();
        assert_eq!(volume.data(), &[1.0, 10.0, 10.0, 2.0]);
    }

    #[test]
    fn test_decodes_big_endian_uint16() {
        let mut bytes = b"NRRD0004\ntype: unsigned short\ndimension: 3\nsizes: 2 1 1\nendian: big\nencoding: raw\n\n".to_vec();
        bytes.extend_from_slice(&[0x01, 0x00, 0x00, 0x02]);

        let volume = decode_volume(&bytes).unwrap();
        assert_eq!(volume.dims(), [1, 1, 2]);
        assert_eq!(volume.data(), &[256.0, 2.0]);
    }

    #[test]
    fn test_decodes_uint8_with_comments_and_key_values() {
        let mut bytes = b"NRRD0005\n# comment\nspace:=whatever\ntype: uchar\ndimension: 3\nsizes: 1 1 3\nencoding: raw\n\n".to_vec();
        bytes.extend_from_slice(&[0, 128, 255]);

        let volume = decode_volume(&bytes).unwrap();
        assert_eq!(volume.dims(), [3, 1, 1]);
        assert_eq!(volume.data(), &[0.0, 128.0, 255.0]);
    }

    #[test]
    fn test_rejects_unsupported_encoding() {
        let bytes = b"NRRD0004\ntype: float\ndimension: 3\nsizes: 1 1 1\nencoding: bzip2\n\n\0\0\0\0";
        let err = decode_volume(bytes).unwrap_err();
        assert!(err.to_string().contains("bzip2"), "{}", err);
    }

    #[test]
    fn test_rejects_corrupt_gzip_payload() {
        let bytes = b"NRRD0004\ntype: float\ndimension: 3\nsizes: 1 1 1\nencoding: gzip\n\n\0\0\0\0";
        assert!(decode_volume(bytes).is_err());
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let bytes = b"NRRD0004\ntype: float\ndimension: 3\nsizes: 2 1 1\nencoding: raw\n\n\0\0\0\0";
        assert!(decode_volume(bytes).is_err());
    }

    #[test]
    fn test_rejects_non_volume() {
        let bytes = b"NRRD0004\ntype: float\ndimension: 2\nsizes: 1 1\nencoding: raw\n\n\0\0\0\0";
        assert!(decode_volume(bytes).is_err());
    }
}
