//! 几何基础类型模块
//!
//! 本模块定义了空间查询与合成计算使用的基本几何类型:
//!
//! - `BoundingBox`: 轴对齐的地理包围盒
//! - `srs`: 空间参考系统之间的坐标重投影
//!
//! 复杂的多边形谓词(相交/包含/求交)由 `geo` crate 提供,
//! 本模块负责包围盒与 `geo` 类型之间的转换。

use geo::{polygon, Coord, Polygon, Rect};
use std::fmt;

pub mod srs;

/// 轴对齐的地理包围盒
///
/// 以覆盖层空间参考系的坐标表示。瓦片与剖分的足迹在
/// 持久化层中以冗余的包围盒列存储,用于空间范围查询。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    /// 创建一个新的包围盒
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    /// 包围盒是否有效(最小值不大于最大值且所有分量有限)
    pub fn is_valid(&self) -> bool {
        self.minx <= self.maxx
            && self.miny <= self.maxy
            && [self.minx, self.miny, self.maxx, self.maxy]
                .iter()
                .all(|v| v.is_finite())
    }

    /// 包围盒宽度
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    /// 包围盒高度
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// 两个包围盒是否相交(共享边界视为相交)
    pub fn intersects(&self, other: &Self) -> bool {
        self.minx <= other.maxx
            && self.maxx >= other.minx
            && self.miny <= other.maxy
            && self.maxy >= other.miny
    }

    /// 计算两个包围盒的交集
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self::new(
            self.minx.max(other.minx),
            self.miny.max(other.miny),
            self.maxx.min(other.maxx),
            self.maxy.min(other.maxy),
        ))
    }

    /// 扩展包围盒以包含另一个包围盒
    pub fn expand(&mut self, other: &Self) {
        self.minx = self.minx.min(other.minx);
        self.miny = self.miny.min(other.miny);
        self.maxx = self.maxx.max(other.maxx);
        self.maxy = self.maxy.max(other.maxy);
    }

    /// 点是否位于包围盒内(含边界)
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.minx && x <= self.maxx && y >= self.miny && y <= self.maxy
    }

    /// 转换为 geo 多边形(顺时针闭合矩形环)
    pub fn to_polygon(&self) -> Polygon<f64> {
        polygon![
            (x: self.minx, y: self.miny),
            (x: self.maxx, y: self.miny),
            (x: self.maxx, y: self.maxy),
            (x: self.minx, y: self.maxy),
            (x: self.minx, y: self.miny),
        ]
    }

    /// 转换为 geo 矩形
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.minx,
                y: self.miny,
            },
            Coord {
                x: self.maxx,
                y: self.maxy,
            },
        )
    }

    /// 从 geo 矩形创建包围盒
    pub fn from_rect(rect: &Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BBox({}, {} - {}, {})",
            self.minx, self.miny, self.maxx, self.maxy
        )
    }
}
