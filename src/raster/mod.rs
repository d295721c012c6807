//! 像素缓冲区模块
//!
//! 本模块提供了检索引擎内部使用的解码像素数据表示。
//! 一个 [`PixelBuffer`] 既可以表示单个解码后的瓦片,也可以表示
//! 一次检索调用的目标缓冲区。
//!
//! # 主要功能
//!
//! - 按 (样本类型 × 波段数) 组织的交错像素数据
//! - 可选的透明遮罩(每像素一个字节,0 表示透明)
//! - 可选的调色板
//! - 目标缓冲区的无数据底色填充(Buffer Primer)

use std::fmt::Display;

mod samples;

pub use samples::{Palette, PixelKind, SampleKind};

/// 栅格操作过程中可能出现的错误
#[derive(Debug)]
pub enum RasterError {
    /// 缓冲区大小不匹配错误
    /// 包含 (实际大小, (宽度, 高度), 波段数, 每样本字节数)
    BufferSize((usize, (u32, u32), u8, usize)),
    /// 缓冲区分配失败,包含请求的字节数
    Allocation(usize),
    /// 遮罩大小不匹配,包含 (实际大小, 期望大小)
    MaskSize((usize, usize)),
    /// 不支持的操作
    NotSupported(String),
}

/// 表示一个解码后的像素栅格
///
/// 像素数据按交错方式存储: 每个像素的所有波段样本连续排列,
/// 多字节样本使用小端字节序。1/2/4位样本类型在此表示中
/// 已展开为每样本一个字节。
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    /// 宽度(像素)
    pub width: u32,
    /// 高度(像素)
    pub height: u32,
    /// 样本类型
    pub sample: SampleKind,
    /// 像素类型
    pub pixel: PixelKind,
    /// 波段数
    pub bands: u8,
    /// 像素数据缓冲区
    pub buffer: Vec<u8>,
    /// 透明遮罩,每像素一个字节,0 表示透明
    pub mask: Option<Vec<u8>>,
    /// 调色板(仅调色板像素类型携带)
    pub palette: Option<Palette>,
}

impl PixelBuffer {
    /// 创建一个新的 PixelBuffer 实例
    ///
    /// # 错误
    ///
    /// * 缓冲区大小与尺寸不一致时返回 `BufferSize`
    /// * 遮罩大小与像素数不一致时返回 `MaskSize`
    pub fn new(
        width: u32,
        height: u32,
        sample: SampleKind,
        pixel: PixelKind,
        bands: u8,
        buffer: Vec<u8>,
        mask: Option<Vec<u8>>,
        palette: Option<Palette>,
    ) -> Result<Self, RasterError> {
        let sample_bytes = sample.byte_size();
        let required = width as usize * height as usize * bands as usize * sample_bytes;
        if buffer.len() != required {
            return Err(RasterError::BufferSize((
                buffer.len(),
                (width, height),
                bands,
                sample_bytes,
            )));
        }
        if let Some(m) = &mask {
            let pixels = width as usize * height as usize;
            if m.len() != pixels {
                return Err(RasterError::MaskSize((m.len(), pixels)));
            }
        }
        Ok(Self {
            width,
            height,
            sample,
            pixel,
            bands,
            buffer,
            mask,
            palette,
        })
    }

    /// 创建并填充底色的目标缓冲区(Buffer Primer)
    ///
    /// 在任何瓦片合成之前,将每个目标样本填充为无数据/背景值。
    /// `fill` 为每波段一个值;为 None 时填充 0。
    /// 调色板类型应传入无数据调色板索引作为唯一的填充值。
    ///
    /// # 错误
    ///
    /// 分配失败时返回 `Allocation`,立即向调用者暴露。
    pub fn primed(
        width: u32,
        height: u32,
        sample: SampleKind,
        pixel: PixelKind,
        bands: u8,
        fill: Option<&[f64]>,
    ) -> Result<Self, RasterError> {
        let sample_bytes = sample.byte_size();
        let pixel_bytes = bands as usize * sample_bytes;
        let required = width as usize * height as usize * pixel_bytes;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(required)
            .map_err(|_| RasterError::Allocation(required))?;
        buffer.resize(required, 0);

        // 无填充值时保持全零
        if let Some(values) = fill {
            let mut pattern = Vec::with_capacity(pixel_bytes);
            for band in 0..bands as usize {
                let value = values.get(band).copied().unwrap_or(0.0);
                pattern.extend_from_slice(&encode_sample(value, sample)[..sample_bytes]);
            }
            for chunk in buffer.chunks_exact_mut(pixel_bytes) {
                chunk.copy_from_slice(&pattern);
            }
        }

        Self::new(width, height, sample, pixel, bands, buffer, None, None)
    }

    /// 解码后缓冲区中每个样本占用的字节数
    pub fn sample_bytes(&self) -> usize {
        self.sample.byte_size()
    }

    /// 每个像素占用的字节数
    pub fn pixel_bytes(&self) -> usize {
        self.bands as usize * self.sample.byte_size()
    }

    /// 指定像素在缓冲区中的字节偏移量
    ///
    /// 调用者负责保证坐标在范围内。
    pub fn pixel_offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.pixel_bytes()
    }

    /// 读取指定位置与波段的样本值
    ///
    /// 所有样本类型都以 f64 返回,32 位以内的整数和单精度
    /// 浮点数可无损表示。坐标越界时返回 None。
    pub fn sample_value(&self, x: u32, y: u32, band: u8) -> Option<f64> {
        if x >= self.width || y >= self.height || band >= self.bands {
            return None;
        }
        let offset = self.pixel_offset(x, y) + band as usize * self.sample_bytes();
        Some(decode_sample(&self.buffer[offset..], self.sample))
    }

    /// 写入指定位置与波段的样本值
    pub fn put_sample_value(&mut self, x: u32, y: u32, band: u8, value: f64) {
        if x >= self.width || y >= self.height || band >= self.bands {
            return;
        }
        let sample_bytes = self.sample_bytes();
        let offset = self.pixel_offset(x, y) + band as usize * sample_bytes;
        let encoded = encode_sample(value, self.sample);
        self.buffer[offset..offset + sample_bytes].copy_from_slice(&encoded[..sample_bytes]);
    }

    /// 指定像素是否被遮罩标记为透明
    ///
    /// 遮罩字节为 0 表示透明;没有遮罩时所有像素可见。
    pub fn is_masked(&self, x: u32, y: u32) -> bool {
        match &self.mask {
            Some(mask) => {
                let index = y as usize * self.width as usize + x as usize;
                mask.get(index).map(|v| *v == 0).unwrap_or(false)
            }
            None => false,
        }
    }
}

/// 将 f64 值编码为指定样本类型的小端字节
///
/// 返回固定 8 字节数组,调用者按样本字节数截取。
pub(crate) fn encode_sample(value: f64, sample: SampleKind) -> [u8; 8] {
    let mut out = [0u8; 8];
    match sample {
        SampleKind::Bit1 | SampleKind::Bit2 | SampleKind::Bit4 | SampleKind::UInt8 => {
            out[0] = value as u8;
        }
        SampleKind::Int8 => {
            out[0] = (value as i8) as u8;
        }
        SampleKind::UInt16 => out[..2].copy_from_slice(&(value as u16).to_le_bytes()),
        SampleKind::Int16 => out[..2].copy_from_slice(&(value as i16).to_le_bytes()),
        SampleKind::UInt32 => out[..4].copy_from_slice(&(value as u32).to_le_bytes()),
        SampleKind::Int32 => out[..4].copy_from_slice(&(value as i32).to_le_bytes()),
        SampleKind::Float32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
        SampleKind::Float64 => out.copy_from_slice(&value.to_le_bytes()),
        SampleKind::Unknown => {}
    }
    out
}

/// 从小端字节解码指定样本类型的值
pub(crate) fn decode_sample(bytes: &[u8], sample: SampleKind) -> f64 {
    match sample {
        SampleKind::Bit1 | SampleKind::Bit2 | SampleKind::Bit4 | SampleKind::UInt8 => {
            bytes[0] as f64
        }
        SampleKind::Int8 => (bytes[0] as i8) as f64,
        SampleKind::UInt16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        SampleKind::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        SampleKind::UInt32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        SampleKind::Int32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        SampleKind::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        SampleKind::Float64 => f64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
        SampleKind::Unknown => 0.0,
    }
}

impl Display for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PixelBuffer({}x{}, {:?}, {:?}, {}波段, {}字节)",
            self.width,
            self.height,
            self.sample,
            self.pixel,
            self.bands,
            self.buffer.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_is_validated() {
        let result = PixelBuffer::new(
            4,
            4,
            SampleKind::UInt8,
            PixelKind::Grayscale,
            1,
            vec![0; 15],
            None,
            None,
        );
        assert!(matches!(result, Err(RasterError::BufferSize(_))));
    }

    #[test]
    fn primed_fills_every_sample() {
        let buf = PixelBuffer::primed(
            3,
            2,
            SampleKind::UInt16,
            PixelKind::Rgb,
            3,
            Some(&[7.0, 8.0, 9.0]),
        )
        .unwrap();
        for y in 0..2 {
            for x in 0..3 {
                assert_eq!(buf.sample_value(x, y, 0), Some(7.0));
                assert_eq!(buf.sample_value(x, y, 1), Some(8.0));
                assert_eq!(buf.sample_value(x, y, 2), Some(9.0));
            }
        }
    }

    #[test]
    fn primed_without_fill_is_zero() {
        let buf =
            PixelBuffer::primed(2, 2, SampleKind::Float64, PixelKind::DataGrid, 1, None).unwrap();
        assert_eq!(buf.sample_value(1, 1, 0), Some(0.0));
    }

    #[test]
    fn sample_roundtrip_all_kinds() {
        for (kind, value) in [
            (SampleKind::UInt8, 200.0),
            (SampleKind::Int8, -100.0),
            (SampleKind::UInt16, 60000.0),
            (SampleKind::Int16, -30000.0),
            (SampleKind::Int32, -100000.0),
            (SampleKind::UInt32, 4000000.0),
            (SampleKind::Float32, 1.5),
            (SampleKind::Float64, -2.25),
        ] {
            let mut buf = PixelBuffer::primed(1, 1, kind, PixelKind::DataGrid, 1, None).unwrap();
            buf.put_sample_value(0, 0, 0, value);
            assert_eq!(buf.sample_value(0, 0, 0), Some(value), "{kind:?}");
        }
    }

    #[test]
    fn mask_marks_transparency() {
        let buf = PixelBuffer::new(
            2,
            1,
            SampleKind::UInt8,
            PixelKind::Grayscale,
            1,
            vec![10, 20],
            Some(vec![0, 1]),
            None,
        )
        .unwrap();
        assert!(buf.is_masked(0, 0));
        assert!(!buf.is_masked(1, 0));
    }
}
