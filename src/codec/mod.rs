//! 瓦片载荷编解码模块
//!
//! 本模块实现了瓦片载荷的编解码契约。载荷是自描述的:
//! 固定的小端头部携带尺寸、样本/像素类型、波段数与编解码器标识,
//! 随后是编解码器压缩的像素主体、可选的 1 位打包透明遮罩
//! (DEFLATE 压缩)以及可选的调色板。
//!
//! # 支持的编解码器
//!
//! - `None` - 原始样本字节
//! - `Deflate` - zlib 压缩
//! - `Png` / `Jpeg` / `Webp` - 通过 image crate 的图像主体
//!   (仅限 8 位灰度/调色板索引/RGB)
//!
//! 检索引擎对所有编解码器使用统一的 [`decode`] / [`encode`] 接口,
//! 不关心字节由哪个图像编解码器产生。

use crate::raster::{Palette, PixelBuffer, PixelKind, RasterError, SampleKind};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat};
use num_enum::{FromPrimitive, IntoPrimitive};
use std::io::{self, Cursor, Read, Write};

/// 载荷头部的魔数
pub const PAYLOAD_MAGIC: [u8; 4] = *b"PYT1";

/// 载荷头部的固定长度(字节)
const HEADER_LEN: usize = 22;

/// 编解码过程中可能出现的错误
#[derive(Debug)]
pub enum CodecError {
    /// 魔数不匹配,包含实际读到的字节
    BadMagic([u8; 4]),
    /// 载荷被截断,包含 (实际长度, 需要长度)
    Truncated((usize, usize)),
    /// 图像编解码错误
    ImageError(image::ImageError),
    /// IO 操作错误
    IoError(io::Error),
    /// 不支持的编解码器
    CodecNotSupported(TileCodec),
    /// 编解码器不支持的数据形状,包含 (样本类型, 像素类型, 波段数)
    UnsupportedShape((SampleKind, PixelKind, u8)),
    /// 解码后的图像尺寸与头部不一致,包含 (实际, 期望)
    DimensionMismatch(((u32, u32), (u32, u32))),
    /// 栅格构造错误
    RasterError(RasterError),
}

/// 编解码操作的通用结果类型
pub type CodecResult<T> = Result<T, CodecError>;

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        CodecError::IoError(e)
    }
}

impl From<image::ImageError> for CodecError {
    fn from(e: image::ImageError) -> Self {
        CodecError::ImageError(e)
    }
}

impl From<RasterError> for CodecError {
    fn from(e: RasterError) -> Self {
        CodecError::RasterError(e)
    }
}

/// 瓦片载荷支持的压缩编解码器
///
/// 判别值会持久化到覆盖层定义表中。
#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum TileCodec {
    /// 无压缩
    None = 0,
    /// DEFLATE (zlib) 压缩
    Deflate = 1,
    /// PNG 图像主体
    Png = 2,
    /// JPEG 图像主体(有损)
    Jpeg = 3,
    /// WebP 图像主体(无损)
    Webp = 4,

    /// 未知编解码器
    #[num_enum(default)]
    Unknown = 255,
}

impl TileCodec {
    /// 该编解码器是否有损
    pub fn is_lossy(&self) -> bool {
        matches!(self, Self::Jpeg)
    }
}

/// 将载荷字节解码为像素栅格
///
/// 遮罩与调色板(如存在)会附加到返回的 [`PixelBuffer`] 上。
///
/// # 错误
///
/// * 魔数或长度校验失败时返回 `BadMagic` / `Truncated`
/// * 主体解码失败时返回对应的编解码错误
/// * 解码结果与头部声明不一致时返回 `DimensionMismatch`
pub fn decode(payload: &[u8]) -> CodecResult<PixelBuffer> {
    if payload.len() < HEADER_LEN {
        return Err(CodecError::Truncated((payload.len(), HEADER_LEN)));
    }

    // 解析头部
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&payload[0..4]);
    if magic != PAYLOAD_MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    let width = u16::from_le_bytes([payload[4], payload[5]]) as u32;
    let height = u16::from_le_bytes([payload[6], payload[7]]) as u32;
    let sample = SampleKind::from(payload[8]);
    let pixel = PixelKind::from(payload[9]);
    let bands = payload[10];
    let codec = TileCodec::from(payload[11]);
    let body_len = u32::from_le_bytes([payload[12], payload[13], payload[14], payload[15]]) as usize;
    let mask_len = u32::from_le_bytes([payload[16], payload[17], payload[18], payload[19]]) as usize;
    let palette_entries = u16::from_le_bytes([payload[20], payload[21]]) as usize;

    let palette_len = palette_entries * 3;
    let total = HEADER_LEN + body_len + mask_len + palette_len;
    if payload.len() < total {
        return Err(CodecError::Truncated((payload.len(), total)));
    }

    let body = &payload[HEADER_LEN..HEADER_LEN + body_len];
    let mask_bytes = &payload[HEADER_LEN + body_len..HEADER_LEN + body_len + mask_len];
    let palette_bytes = &payload[HEADER_LEN + body_len + mask_len..total];

    // 解码像素主体
    let buffer = decode_body(body, codec, width, height, sample, pixel, bands)?;

    // 解码遮罩: DEFLATE 解压后为 1 位打包,展开为每像素一个字节
    let mask = if mask_len > 0 {
        let mut packed = Vec::new();
        ZlibDecoder::new(mask_bytes).read_to_end(&mut packed)?;
        Some(unpack_mask(&packed, width as usize * height as usize))
    } else {
        None
    };

    let palette = if palette_len > 0 {
        Palette::from_blob(palette_bytes)
    } else {
        None
    };

    Ok(PixelBuffer::new(
        width, height, sample, pixel, bands, buffer, mask, palette,
    )?)
}

/// 将像素栅格编码为载荷字节
///
/// 栅格携带的遮罩与调色板会一并写入载荷。
pub fn encode(raster: &PixelBuffer, codec: TileCodec) -> CodecResult<Vec<u8>> {
    let body = encode_body(raster, codec)?;

    // 打包并压缩遮罩
    let mask_bytes = match &raster.mask {
        Some(mask) => {
            let packed = pack_mask(mask);
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&packed)?;
            encoder.finish()?
        }
        None => Vec::new(),
    };

    let palette_blob = raster
        .palette
        .as_ref()
        .map(|p| p.to_blob())
        .unwrap_or_default();
    let palette_entries = palette_blob.len() / 3;

    let mut payload = Vec::with_capacity(HEADER_LEN + body.len() + mask_bytes.len());
    payload.extend_from_slice(&PAYLOAD_MAGIC);
    payload.extend_from_slice(&(raster.width as u16).to_le_bytes());
    payload.extend_from_slice(&(raster.height as u16).to_le_bytes());
    payload.push(raster.sample.into());
    payload.push(raster.pixel.into());
    payload.push(raster.bands);
    payload.push(codec.into());
    payload.extend_from_slice(&(body.len() as u32).to_le_bytes());
    payload.extend_from_slice(&(mask_bytes.len() as u32).to_le_bytes());
    payload.extend_from_slice(&(palette_entries as u16).to_le_bytes());
    payload.extend_from_slice(&body);
    payload.extend_from_slice(&mask_bytes);
    payload.extend_from_slice(&palette_blob);
    Ok(payload)
}

/// 解码像素主体
fn decode_body(
    body: &[u8],
    codec: TileCodec,
    width: u32,
    height: u32,
    sample: SampleKind,
    pixel: PixelKind,
    bands: u8,
) -> CodecResult<Vec<u8>> {
    match codec {
        TileCodec::None => Ok(body.to_vec()),
        TileCodec::Deflate => {
            let mut buf = Vec::new();
            ZlibDecoder::new(body).read_to_end(&mut buf)?;
            Ok(buf)
        }
        TileCodec::Png | TileCodec::Jpeg | TileCodec::Webp => {
            let format = image_format(codec);
            let image = image::load_from_memory_with_format(body, format)?;
            if image.width() != width || image.height() != height {
                return Err(CodecError::DimensionMismatch((
                    (image.width(), image.height()),
                    (width, height),
                )));
            }
            image_to_samples(image, sample, pixel, bands)
        }
        other => Err(CodecError::CodecNotSupported(other)),
    }
}

/// 编码像素主体
fn encode_body(raster: &PixelBuffer, codec: TileCodec) -> CodecResult<Vec<u8>> {
    match codec {
        TileCodec::None => Ok(raster.buffer.clone()),
        TileCodec::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&raster.buffer)?;
            Ok(encoder.finish()?)
        }
        TileCodec::Png | TileCodec::Jpeg | TileCodec::Webp => {
            let image = samples_to_image(raster)?;
            let mut out = Cursor::new(Vec::new());
            image.write_to(&mut out, image_format(codec))?;
            Ok(out.into_inner())
        }
        other => Err(CodecError::CodecNotSupported(other)),
    }
}

fn image_format(codec: TileCodec) -> ImageFormat {
    match codec {
        TileCodec::Png => ImageFormat::Png,
        TileCodec::Jpeg => ImageFormat::Jpeg,
        _ => ImageFormat::WebP,
    }
}

/// 图像编解码器只覆盖 8 位灰度/调色板索引/RGB 的形状
fn image_shape_supported(sample: SampleKind, pixel: PixelKind, bands: u8) -> bool {
    sample == SampleKind::UInt8
        && match pixel {
            PixelKind::Grayscale | PixelKind::Palette | PixelKind::Monochrome => bands == 1,
            PixelKind::Rgb => bands == 3,
            _ => false,
        }
}

/// 将解码后的图像展开为原始样本字节
fn image_to_samples(
    image: DynamicImage,
    sample: SampleKind,
    pixel: PixelKind,
    bands: u8,
) -> CodecResult<Vec<u8>> {
    if !image_shape_supported(sample, pixel, bands) {
        return Err(CodecError::UnsupportedShape((sample, pixel, bands)));
    }
    match bands {
        1 => Ok(image.to_luma8().into_raw()),
        _ => Ok(image.to_rgb8().into_raw()),
    }
}

/// 将原始样本字节包装为可编码的图像
fn samples_to_image(raster: &PixelBuffer) -> CodecResult<DynamicImage> {
    if !image_shape_supported(raster.sample, raster.pixel, raster.bands) {
        return Err(CodecError::UnsupportedShape((
            raster.sample,
            raster.pixel,
            raster.bands,
        )));
    }
    let shape_error = CodecError::UnsupportedShape((raster.sample, raster.pixel, raster.bands));
    match raster.bands {
        1 => image::GrayImage::from_raw(raster.width, raster.height, raster.buffer.clone())
            .map(DynamicImage::ImageLuma8)
            .ok_or(shape_error),
        _ => image::RgbImage::from_raw(raster.width, raster.height, raster.buffer.clone())
            .map(DynamicImage::ImageRgb8)
            .ok_or(shape_error),
    }
}

/// 将每像素一字节的遮罩打包为 1 位
fn pack_mask(mask: &[u8]) -> Vec<u8> {
    let mut packed = vec![0u8; (mask.len() + 7) / 8];
    for (i, value) in mask.iter().enumerate() {
        if *value != 0 {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

/// 将 1 位打包的遮罩展开为每像素一字节
fn unpack_mask(packed: &[u8], pixels: usize) -> Vec<u8> {
    let mut mask = vec![0u8; pixels];
    for (i, byte) in mask.iter_mut().enumerate() {
        let bit = packed
            .get(i / 8)
            .map(|b| (b >> (i % 8)) & 1)
            .unwrap_or(0);
        *byte = bit;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_tile(width: u32, height: u32) -> PixelBuffer {
        let buffer: Vec<u8> = (0..width * height).map(|i| (i % 251) as u8).collect();
        PixelBuffer::new(
            width,
            height,
            SampleKind::UInt8,
            PixelKind::Grayscale,
            1,
            buffer,
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn deflate_roundtrip_preserves_samples() {
        let tile = gray_tile(16, 8);
        let payload = encode(&tile, TileCodec::Deflate).unwrap();
        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.buffer, tile.buffer);
        assert_eq!(decoded.sample, SampleKind::UInt8);
        assert_eq!((decoded.width, decoded.height), (16, 8));
    }

    #[test]
    fn none_codec_stores_raw_bytes() {
        let tile = gray_tile(4, 4);
        let payload = encode(&tile, TileCodec::None).unwrap();
        assert_eq!(&payload[HEADER_LEN..HEADER_LEN + 16], &tile.buffer[..]);
        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.buffer, tile.buffer);
    }

    #[test]
    fn png_roundtrip_rgb() {
        let buffer: Vec<u8> = (0..8 * 4 * 3).map(|i| (i * 7 % 256) as u8).collect();
        let tile = PixelBuffer::new(
            8,
            4,
            SampleKind::UInt8,
            PixelKind::Rgb,
            3,
            buffer.clone(),
            None,
            None,
        )
        .unwrap();
        let payload = encode(&tile, TileCodec::Png).unwrap();
        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.buffer, buffer);
        assert_eq!(decoded.bands, 3);
    }

    #[test]
    fn mask_and_palette_survive_roundtrip() {
        let mut tile = gray_tile(5, 3);
        tile.pixel = PixelKind::Palette;
        // 将缓冲区限制为有效的调色板索引
        for v in tile.buffer.iter_mut() {
            *v %= 4;
        }
        tile.mask = Some(
            (0..15u8)
                .map(|i| if i % 2 == 0 { 1 } else { 0 })
                .collect(),
        );
        tile.palette = Some(Palette(vec![
            (0, 0, 0),
            (255, 0, 0),
            (0, 255, 0),
            (0, 0, 255),
        ]));
        let payload = encode(&tile, TileCodec::Deflate).unwrap();
        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.mask, tile.mask);
        assert_eq!(decoded.palette, tile.palette);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let tile = gray_tile(2, 2);
        let mut payload = encode(&tile, TileCodec::None).unwrap();
        payload[0] = b'X';
        assert!(matches!(decode(&payload), Err(CodecError::BadMagic(_))));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let tile = gray_tile(4, 4);
        let payload = encode(&tile, TileCodec::Deflate).unwrap();
        let cut = &payload[..payload.len() - 3];
        assert!(matches!(decode(cut), Err(CodecError::Truncated(_))));
    }

    #[test]
    fn float_grid_rejects_image_codec() {
        let grid =
            PixelBuffer::primed(4, 4, SampleKind::Float32, PixelKind::DataGrid, 1, None).unwrap();
        assert!(matches!(
            encode(&grid, TileCodec::Png),
            Err(CodecError::UnsupportedShape(_))
        ));
        // DEFLATE 对任意形状可用
        let payload = encode(&grid, TileCodec::Deflate).unwrap();
        assert_eq!(decode(&payload).unwrap().sample, SampleKind::Float32);
    }
}
