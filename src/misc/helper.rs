// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading depth maps from disk.

use byteorder::{BigEndian, ReadBytesExt};
use std::{fs::File, io, io::Cursor, path::Path};
use thiserror::Error;

use crate::core::depth::DepthMap;
use crate::misc::type_aliases::Float;

/// Errors when reading a depth image.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("cannot open image: {0}")]
    Io(#[from] io::Error),
    #[error("cannot decode png: {0}")]
    Png(#[from] png::DecodingError),
    #[error("expected a 16 bits gray image, got {color:?} with {depth:?}")]
    NotGray16 {
        color: png::ColorType,
        depth: png::BitDepth,
    },
}

/// Read a 16 bit gray png image from a file.
/// Returns `(width, height, values)` with values in row major order.
pub fn read_png_16bits<P: AsRef<Path>>(file_path: P) -> Result<(usize, usize, Vec<u16>), ReadError> {
    let img_file = File::open(file_path)?;
    let mut decoder = png::Decoder::new(img_file);
    // Use the IDENTITY transformation because by default
    // it will use STRIP_16 which only keep 8 bits.
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info()?;
    let mut buffer = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buffer)?;
    if info.color_type != png::ColorType::Grayscale || info.bit_depth != png::BitDepth::Sixteen {
        return Err(ReadError::NotGray16 {
            color: info.color_type,
            depth: info.bit_depth,
        });
    }

    // PNG stores 16 bits samples in big endian.
    let (width, height) = (info.width as usize, info.height as usize);
    let mut buffer_u16 = vec![0; width * height];
    let mut buffer_cursor = Cursor::new(&buffer[..info.buffer_size()]);
    buffer_cursor.read_u16_into::<BigEndian>(&mut buffer_u16)?;
    Ok((width, height, buffer_u16))
}

/// Read a metric depth map from a 16 bits png, `depth = raw / scale`.
/// Null raw values (missing depth) are mapped to NaN.
pub fn read_depth_png<P: AsRef<Path>>(file_path: P, scale: Float) -> Result<DepthMap, ReadError> {
    let (width, height, raw) = read_png_16bits(file_path)?;
    let depth = DepthMap::from_raw_u16(width, height, &raw, scale);
    let values = depth
        .values()
        .map(|d| if d == 0.0 { Float::NAN } else { d });
    Ok(DepthMap::new(values))
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use std::{env, fs, io::BufWriter, path::PathBuf};

    fn write_png(name: &str, width: u32, height: u32, values: &[u16], depth: png::BitDepth) -> PathBuf {
        let path = env::temp_dir().join(format!("wcrs_helper_{}_{}.png", name, std::process::id()));
        let file = File::create(&path).unwrap();
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(depth);
        let mut writer = encoder.write_header().unwrap();
        let bytes: Vec<u8> = match depth {
            png::BitDepth::Sixteen => values.iter().flat_map(|v| v.to_be_bytes()).collect(),
            _ => values.iter().map(|&v| v as u8).collect(),
        };
        writer.write_image_data(&bytes).unwrap();
        path
    }

    #[test]
    fn depth_png_is_read_row_major() {
        let path = write_png("rows", 3, 2, &[1000, 2000, 0, 4000, 5000, 65535], png::BitDepth::Sixteen);
        let depth = read_depth_png(&path, 1000.0).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!((3, 2), (depth.width(), depth.height()));
        approx::assert_relative_eq!(2.0, depth.values()[(0, 1)]);
        approx::assert_relative_eq!(4.0, depth.values()[(1, 0)]);
        approx::assert_relative_eq!(65.535, depth.values()[(1, 2)]);
        assert!(depth.values()[(0, 2)].is_nan());
    }

    #[test]
    fn eight_bits_png_is_rejected() {
        let path = write_png("eight", 2, 2, &[1, 2, 3, 4], png::BitDepth::Eight);
        let result = read_png_16bits(&path);
        fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(ReadError::NotGray16 { .. })));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            read_depth_png("/nonexistent/depth.png", 1.0),
            Err(ReadError::Io(_))
        ));
    }
}
