//! 栅格覆盖层模型模块
//!
//! 本模块定义了存储引擎的核心数据模型。一个覆盖层 (Coverage)
//! 是一个命名的栅格数据集,对应一个逻辑模式实例:
//!
//! - 覆盖层 → 剖分 (导入的源影像) → 金字塔层级 → 瓦片 → 瓦片载荷
//!
//! # 核心不变式
//!
//! 同一 (剖分, 层级) 的瓦片集合恰好且互不重叠地铺满该剖分的
//! 足迹。合成阶段对目标缓冲区的无锁并发写入依赖这一不变式。
//!
//! # 主要组件
//!
//! - [`Coverage`] - 覆盖层定义,创建后由统计/范围维护操作更新
//! - [`CoveragePolicies`] - 覆盖层策略标志
//! - [`level`] - 金字塔层级与分辨率匹配
//! - [`error`] - 统一错误类型

use crate::codec::TileCodec;
use crate::geometry::BoundingBox;
use crate::raster::{Palette, PixelKind, SampleKind};
use std::fmt::Display;

pub mod error;
pub mod level;

pub use error::{PyraliteError, PyraliteResult};
pub use level::{
    find_matching_resolution, LevelResolutions, ResolutionMatch, TileScale, RESOLUTION_TOLERANCE,
};

/// 覆盖层策略标志
///
/// 在创建覆盖层时确定,持久化在覆盖层行上。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoveragePolicies {
    /// 严格分辨率: 检索时不允许近似分辨率回退
    pub strict_resolution: bool,
    /// 混合分辨率: 每个剖分存储自己的原生分辨率
    pub mixed_resolutions: bool,
    /// 保留剖分源文件路径
    pub keep_section_paths: bool,
    /// 保留剖分源文件 MD5 校验和
    pub keep_section_md5: bool,
    /// 保留剖分摘要信息
    pub keep_section_summaries: bool,
}

/// 一个命名的栅格数据集
///
/// 创建是跨所有支撑关系全有或全无的;永远不会存在
/// 部分有效的覆盖层。创建之后,只有统计与范围维护操作
/// 会更新覆盖层行。
#[derive(Debug, Clone)]
pub struct Coverage {
    /// 覆盖层名称,同时是模式实例的表名前缀
    pub name: String,
    /// 样本类型
    pub sample: SampleKind,
    /// 像素类型
    pub pixel: PixelKind,
    /// 波段数
    pub bands: u8,
    /// 瓦片载荷编解码器
    pub codec: TileCodec,
    /// 瓦片宽度(像素)
    pub tile_width: u32,
    /// 瓦片高度(像素)
    pub tile_height: u32,
    /// 空间参考系标识
    pub srid: i32,
    /// 标称水平分辨率
    pub x_res: f64,
    /// 标称垂直分辨率
    pub y_res: f64,
    /// 无数据像素值,每波段一个分量
    /// (调色板类型为单个无数据调色板索引)
    pub no_data: Option<Vec<f64>>,
    /// 调色板(仅调色板像素类型)
    pub palette: Option<Palette>,
    /// 策略标志
    pub policies: CoveragePolicies,
    /// 覆盖层范围,由范围维护操作从剖分足迹重算
    pub extent: Option<BoundingBox>,
}

impl Coverage {
    /// 校验覆盖层定义的内部一致性
    ///
    /// 在创建时调用;配置错误在任何 I/O 之前被拒绝。
    ///
    /// # 错误
    ///
    /// 波段数与像素类型不一致、调色板缺失/多余、瓦片尺寸为零
    /// 或无数据分量数不符时返回 `UnsupportedConfiguration`。
    pub fn validate(&self) -> PyraliteResult<()> {
        if self.name.is_empty() {
            return Err(PyraliteError::UnsupportedConfiguration(
                "覆盖层名称不能为空".into(),
            ));
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(PyraliteError::UnsupportedConfiguration(format!(
                "非法的瓦片尺寸: {}x{}",
                self.tile_width, self.tile_height
            )));
        }
        if self.sample == SampleKind::Unknown || self.pixel == PixelKind::Unknown {
            return Err(PyraliteError::UnsupportedConfiguration(
                "未知的样本或像素类型".into(),
            ));
        }
        if !self.pixel.accepts_band_count(self.bands) {
            return Err(PyraliteError::UnsupportedConfiguration(format!(
                "像素类型 {:?} 不接受 {} 个波段",
                self.pixel, self.bands
            )));
        }
        // 调色板存在性必须与像素类型一致
        match (self.pixel, &self.palette) {
            (PixelKind::Palette, None) => {
                return Err(PyraliteError::UnsupportedConfiguration(
                    "调色板像素类型缺少调色板".into(),
                ));
            }
            (PixelKind::Palette, Some(p)) if p.is_empty() => {
                return Err(PyraliteError::UnsupportedConfiguration(
                    "调色板不能为空".into(),
                ));
            }
            (kind, Some(_)) if kind != PixelKind::Palette => {
                return Err(PyraliteError::UnsupportedConfiguration(format!(
                    "像素类型 {kind:?} 不应携带调色板"
                )));
            }
            _ => {}
        }
        if let Some(no_data) = &self.no_data {
            if no_data.len() != self.bands as usize {
                return Err(PyraliteError::UnsupportedConfiguration(format!(
                    "无数据分量数 {} 与波段数 {} 不符",
                    no_data.len(),
                    self.bands
                )));
            }
        }
        if self.x_res <= 0.0 || self.y_res <= 0.0 {
            return Err(PyraliteError::UnsupportedConfiguration(format!(
                "非法的标称分辨率: ({}, {})",
                self.x_res, self.y_res
            )));
        }
        Ok(())
    }

    /// 无数据调色板索引(仅调色板类型覆盖层有意义)
    pub fn no_data_palette_index(&self) -> u8 {
        self.no_data
            .as_ref()
            .and_then(|v| v.first())
            .map(|v| *v as u8)
            .unwrap_or(0)
    }
}

impl Display for Coverage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Coverage({}, {:?}/{:?}, {}波段, {:?}, 瓦片{}x{}, SRID {})",
            self.name,
            self.sample,
            self.pixel,
            self.bands,
            self.codec,
            self.tile_width,
            self.tile_height,
            self.srid
        )
    }
}
