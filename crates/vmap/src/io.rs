// Binary read/write helpers shared by the vmap file formats

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;

use crate::error::VmapError;
use crate::geometry::AaBox;
use crate::types::VMAP_MAGIC;

/// Longest name accepted for a model file reference.
pub const MAX_NAME_LENGTH: usize = 500;

pub fn open_file(path: &Path) -> Result<BufReader<File>, VmapError> {
    match File::open(path) {
        Ok(file) => Ok(BufReader::new(file)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(VmapError::FileNotFound(path.to_path_buf()))
        }
        Err(err) => Err(err.into()),
    }
}

pub fn create_file(path: &Path) -> Result<BufWriter<File>, VmapError> {
    Ok(BufWriter::new(File::create(path)?))
}

pub fn read_magic<R: Read>(reader: &mut R) -> Result<(), VmapError> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != VMAP_MAGIC {
        return Err(VmapError::InvalidMagic {
            expected: String::from_utf8_lossy(VMAP_MAGIC).into_owned(),
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    Ok(())
}

pub fn write_magic<W: Write>(writer: &mut W) -> Result<(), VmapError> {
    writer.write_all(VMAP_MAGIC)?;
    Ok(())
}

pub fn read_chunk<R: Read>(reader: &mut R, expected: &[u8; 4]) -> Result<(), VmapError> {
    let mut chunk = [0u8; 4];
    reader.read_exact(&mut chunk)?;
    if &chunk != expected {
        return Err(VmapError::ChunkMismatch {
            expected: String::from_utf8_lossy(expected).into_owned(),
            found: String::from_utf8_lossy(&chunk).into_owned(),
        });
    }
    Ok(())
}

pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32, VmapError> {
    Ok(reader.read_u32::<LittleEndian>()?)
}

pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<(), VmapError> {
    writer.write_u32::<LittleEndian>(value)?;
    Ok(())
}

/// Reads a `u32` record header, `None` on a clean end of file.
pub fn read_u32_or_eof<R: Read>(reader: &mut R) -> Result<Option<u32>, VmapError> {
    match reader.read_u32::<LittleEndian>() {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub fn read_vec3<R: Read>(reader: &mut R) -> Result<Vec3, VmapError> {
    let x = reader.read_f32::<LittleEndian>()?;
    let y = reader.read_f32::<LittleEndian>()?;
    let z = reader.read_f32::<LittleEndian>()?;
    Ok(Vec3::new(x, y, z))
}

pub fn write_vec3<W: Write>(writer: &mut W, v: Vec3) -> Result<(), VmapError> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    writer.write_f32::<LittleEndian>(v.z)?;
    Ok(())
}

pub fn read_aabox<R: Read>(reader: &mut R) -> Result<AaBox, VmapError> {
    let lo = read_vec3(reader)?;
    let hi = read_vec3(reader)?;
    Ok(AaBox::new(lo, hi))
}

pub fn write_aabox<W: Write>(writer: &mut W, bound: &AaBox) -> Result<(), VmapError> {
    write_vec3(writer, bound.lo)?;
    write_vec3(writer, bound.hi)
}

pub fn read_name<R: Read>(reader: &mut R) -> Result<String, VmapError> {
    let name_len = reader.read_u32::<LittleEndian>()? as usize;
    if name_len > MAX_NAME_LENGTH {
        return Err(VmapError::format(format!(
            "name length too large: {}",
            name_len
        )));
    }
    let mut name_buf = vec![0u8; name_len];
    reader.read_exact(&mut name_buf)?;
    Ok(String::from_utf8_lossy(&name_buf)
        .trim_end_matches('\0')
        .to_string())
}

pub fn write_name<W: Write>(writer: &mut W, name: &str) -> Result<(), VmapError> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(VmapError::format(format!("name too long: {}", name)));
    }
    writer.write_u32::<LittleEndian>(name.len() as u32)?;
    writer.write_all(name.as_bytes())?;
    Ok(())
}
