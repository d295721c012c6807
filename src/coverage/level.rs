//! 金字塔层级与分辨率匹配模块
//!
//! 本模块实现了金字塔层级的分辨率表示与检索路径的
//! 分辨率匹配算法。
//!
//! 每个层级最多存储四组分辨率对: 原生 "1:1" 以及 1:2、1:4、1:8
//! 抽取,每组独立可选。"比例"始终相对于实际物化的分辨率对。
//!
//! # 匹配规则
//!
//! 请求的两个轴分辨率都落在存储值 1% 容差内时即为命中;
//! 存在多个命中时,**迭代顺序中最后一个命中者胜出**
//! (后面的层级/更高的抽取会覆盖前面的命中)。下游的瓦片选择
//! 按位依赖这一平局规则,调用方必须精确复现,不可"修正"为
//! 首个命中。

use num_enum::{FromPrimitive, IntoPrimitive};

/// 分辨率匹配的相对容差(存储值的 1%)
pub const RESOLUTION_TOLERANCE: f64 = 0.01;

/// 瓦片比例(层级内的抽取因子)
///
/// 相对于层级实际物化的分辨率对: 1 为原生,2/4/8 为抽取。
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum TileScale {
    /// 原生分辨率 (1:1)
    #[num_enum(default)]
    Full = 1,
    /// 1:2 抽取
    Half = 2,
    /// 1:4 抽取
    Quarter = 4,
    /// 1:8 抽取
    Eighth = 8,
}

impl TileScale {
    /// 抽取因子
    pub fn factor(&self) -> u32 {
        *self as u32
    }

    /// 分辨率对列的迭代顺序: 1:1, 1:2, 1:4, 1:8
    pub const ALL: [TileScale; 4] = [
        TileScale::Full,
        TileScale::Half,
        TileScale::Quarter,
        TileScale::Eighth,
    ];
}

/// 一个层级行的分辨率对集合
///
/// 对应 `<coverage>_levels` (或混合分辨率覆盖层的
/// `<coverage>_section_levels`) 的一行。非 1:1 列可以为空。
#[derive(Debug, Clone, PartialEq)]
pub struct LevelResolutions {
    /// 金字塔层级编号,0 为基底
    pub pyramid_level: u32,
    /// 所属剖分(仅混合分辨率覆盖层使用)
    pub section_id: Option<i64>,
    /// 四组分辨率对 (x_res, y_res),按 1:1, 1:2, 1:4, 1:8 排列
    pub pairs: [Option<(f64, f64)>; 4],
}

impl LevelResolutions {
    /// 以原生分辨率构造一个层级行,抽取列按需填充
    pub fn from_native(pyramid_level: u32, x_res: f64, y_res: f64, scales: &[TileScale]) -> Self {
        let mut pairs = [None; 4];
        for (slot, scale) in TileScale::ALL.iter().enumerate() {
            if scales.contains(scale) {
                let f = scale.factor() as f64;
                pairs[slot] = Some((x_res * f, y_res * f));
            }
        }
        Self {
            pyramid_level,
            section_id: None,
            pairs,
        }
    }
}

/// 分辨率匹配结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionMatch {
    /// 选中的金字塔层级
    pub pyramid_level: u32,
    /// 选中的抽取比例
    pub scale: TileScale,
    /// 实际的 x 分辨率(存储值)
    pub x_res: f64,
    /// 实际的 y 分辨率(存储值)
    pub y_res: f64,
}

/// 请求值是否落在存储值的容差内
fn within_tolerance(requested: f64, stored: f64) -> bool {
    (requested - stored).abs() <= stored * RESOLUTION_TOLERANCE
}

/// 在层级行集合中查找与请求分辨率匹配的层级与比例
///
/// 按行序枚举每一行的四个分辨率对列;两个轴都在 1% 容差内
/// 即命中,最后一个命中者胜出。没有任何命中时返回 None,
/// 由调用方转换为 `NoMatchingResolution`。
pub fn find_matching_resolution(
    rows: &[LevelResolutions],
    x_res: f64,
    y_res: f64,
) -> Option<ResolutionMatch> {
    let mut matched = None;
    for row in rows {
        for (slot, scale) in TileScale::ALL.iter().enumerate() {
            if let Some((stored_x, stored_y)) = row.pairs[slot] {
                if within_tolerance(x_res, stored_x) && within_tolerance(y_res, stored_y) {
                    // 后出现的命中覆盖先出现的命中
                    matched = Some(ResolutionMatch {
                        pyramid_level: row.pyramid_level,
                        scale: *scale,
                        x_res: stored_x,
                        y_res: stored_y,
                    });
                }
            }
        }
    }
    matched
}
