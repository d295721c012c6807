//! 样本类型与像素类型相关的枚举定义
//!
//! 本模块定义了与栅格像素数据解释相关的枚举类型,包括:
//! - SampleKind: 定义单个样本的位深度和数值类型
//! - PixelKind: 定义像素数据如何被解释(单色/调色板/灰度/RGB/多波段/数据网格)
//! - Palette: 调色板条目列表
//!
//! 这些判别值会以整数形式持久化到覆盖层定义表中。

use num_enum::{FromPrimitive, IntoPrimitive};

/// 样本类型
///
/// 定义了栅格数据中单个样本的位深度和数值类型。
/// 小于一个字节的类型(1/2/4位)在解码后的像素缓冲区中展开为每样本一个字节。
#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum SampleKind {
    /// 1位样本(二值)
    Bit1 = 1,
    /// 2位样本
    Bit2 = 2,
    /// 4位样本
    Bit4 = 3,
    /// 有符号8位整数
    Int8 = 4,
    /// 无符号8位整数
    UInt8 = 5,
    /// 有符号16位整数
    Int16 = 6,
    /// 无符号16位整数
    UInt16 = 7,
    /// 有符号32位整数
    Int32 = 8,
    /// 无符号32位整数
    UInt32 = 9,
    /// IEEE 单精度浮点数
    Float32 = 10,
    /// IEEE 双精度浮点数
    Float64 = 11,

    /// 未知样本类型
    #[num_enum(default)]
    Unknown = 0,
}

impl SampleKind {
    /// 解码后缓冲区中每个样本占用的字节数
    ///
    /// 1/2/4位类型在解码后展开为一个字节。
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Bit1 | Self::Bit2 | Self::Bit4 | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Float64 => 8,
            Self::Unknown => 0,
        }
    }

    /// 样本是否为整数类型
    pub fn is_integral(&self) -> bool {
        !matches!(self, Self::Float32 | Self::Float64 | Self::Unknown)
    }
}

/// 像素类型
///
/// 定义了一个像素的样本集合如何被解释为颜色或数值。
#[derive(Debug, PartialEq, Eq, Clone, Copy, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum PixelKind {
    /// 单色(二值)图像
    Monochrome = 1,
    /// 调色板索引图像
    Palette = 2,
    /// 灰度图像
    Grayscale = 3,
    /// RGB彩色图像
    Rgb = 4,
    /// 多波段图像(如多光谱遥感影像)
    Multiband = 5,
    /// 数据网格(如高程模型)
    DataGrid = 6,

    /// 未知像素类型
    #[num_enum(default)]
    Unknown = 0,
}

impl PixelKind {
    /// 该像素类型允许的波段数是否合法
    pub fn accepts_band_count(&self, bands: u8) -> bool {
        match self {
            Self::Monochrome | Self::Palette | Self::Grayscale | Self::DataGrid => bands == 1,
            Self::Rgb => bands == 3,
            Self::Multiband => bands >= 2,
            Self::Unknown => false,
        }
    }
}

/// 调色板
///
/// 有序的 (红, 绿, 蓝) 条目列表,由调色板类型的覆盖层持有。
/// 持久化为 3×n 字节的 BLOB。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette(pub Vec<(u8, u8, u8)>);

impl Palette {
    /// 调色板条目数量
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 调色板是否为空
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 序列化为 BLOB(每个条目 3 字节,按顺序排列)
    pub fn to_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.0.len() * 3);
        for (r, g, b) in &self.0 {
            blob.extend_from_slice(&[*r, *g, *b]);
        }
        blob
    }

    /// 从 BLOB 反序列化
    ///
    /// 长度不是 3 的倍数时返回 None。
    pub fn from_blob(blob: &[u8]) -> Option<Self> {
        if blob.len() % 3 != 0 {
            return None;
        }
        Some(Self(
            blob.chunks_exact(3).map(|c| (c[0], c[1], c[2])).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_kind_roundtrip() {
        // 持久化判别值必须往返一致
        for kind in [
            SampleKind::Bit1,
            SampleKind::UInt8,
            SampleKind::Int16,
            SampleKind::Float64,
        ] {
            let code: u8 = kind.into();
            assert_eq!(SampleKind::from(code), kind);
        }
        assert_eq!(SampleKind::from(200u8), SampleKind::Unknown);
    }

    #[test]
    fn pixel_kind_band_counts() {
        assert!(PixelKind::Rgb.accepts_band_count(3));
        assert!(!PixelKind::Rgb.accepts_band_count(1));
        assert!(PixelKind::Multiband.accepts_band_count(6));
        assert!(!PixelKind::Multiband.accepts_band_count(1));
        assert!(PixelKind::DataGrid.accepts_band_count(1));
    }

    #[test]
    fn palette_blob_roundtrip() {
        let palette = Palette(vec![(0, 0, 0), (255, 128, 0), (1, 2, 3)]);
        let blob = palette.to_blob();
        assert_eq!(blob.len(), 9);
        assert_eq!(Palette::from_blob(&blob), Some(palette));
        assert!(Palette::from_blob(&[0, 1]).is_none());
    }
}
