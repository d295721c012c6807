//! 栅格合成模块
//!
//! 本模块将解码后的瓦片像素映射进目标缓冲区。每个瓦片在其
//! 工作者任务内被合成一次:
//!
//! - 根据瓦片左上角地理坐标与目标分辨率做最近像素映射
//!   (无重采样/插值;该映射同时实现 1:2/1:4/1:8 的抽取读取)
//! - 透明优先级按顺序求值: 遮罩 → 无数据相等 → 写入
//! - 波段方案在检索开始时解析并校验一次,作为封闭的策略类型
//!   传入逐像素循环,避免每个像素重新判定类型
//!
//! 对目标缓冲区的写入不加锁: 同一金字塔层级的瓦片足迹
//! 互不重叠,同一突发内的并发工作者写入的目标区域两两不相交。

use crate::coverage::{Coverage, PyraliteError, PyraliteResult};
use crate::geometry::BoundingBox;
use crate::raster::{encode_sample, PixelBuffer, PixelKind, SampleKind};
use crate::render::pool::PixelSink;
use geo::{Contains, MultiPolygon, Point};

/// 目标缓冲区的地理参考
#[derive(Debug, Clone, Copy)]
pub struct DestGeometry {
    /// 输出宽度(像素)
    pub width: u32,
    /// 输出高度(像素)
    pub height: u32,
    /// 输出范围,位于覆盖层空间参考系
    pub bbox: BoundingBox,
    /// 输出 x 分辨率
    pub x_res: f64,
    /// 输出 y 分辨率
    pub y_res: f64,
}

impl DestGeometry {
    /// 从输出范围与像素尺寸构造地理参考
    pub fn new(bbox: BoundingBox, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bbox,
            x_res: bbox.width() / width as f64,
            y_res: bbox.height() / height as f64,
        }
    }
}

/// 调用方请求的波段方案
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandPlan {
    /// 原样复制覆盖层的像素
    Identity,
    /// 从多波段源提取三个波段作为 RGB
    Triple { r: u8, g: u8, b: u8 },
    /// 提取单个波段
    Mono { band: u8 },
    /// 显式波段对的 NDVI 计算
    Ndvi { red: u8, nir: u8 },
    /// 自动推导波段对的 NDVI 计算
    AutoNdvi,
}

/// 解析后的合成策略
///
/// 在任何 I/O 之前解析并校验一次;之后逐像素循环只对
/// [`PlanKind`] 做一次分派。
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub kind: PlanKind,
    /// 输出样本类型
    pub out_sample: SampleKind,
    /// 输出像素类型
    pub out_pixel: PixelKind,
    /// 输出波段数
    pub out_bands: u8,
}

/// 封闭的合成策略和类型
#[derive(Debug, Clone, Copy)]
pub enum PlanKind {
    /// 原样复制
    Copy,
    /// 三波段提取
    Triple { r: u8, g: u8, b: u8 },
    /// 单波段提取
    Mono { band: u8 },
    /// NDVI 计算
    Ndvi { red: u8, nir: u8 },
}

impl ResolvedPlan {
    /// 输出像素的字节数
    pub fn out_pixel_bytes(&self) -> usize {
        self.out_bands as usize * self.out_sample.byte_size()
    }
}

/// 解析并校验波段方案
///
/// 配置错误(例如对非多波段覆盖层请求三波段提取)在任何 I/O
/// 之前被拒绝。
pub fn resolve_plan(plan: &BandPlan, coverage: &Coverage) -> PyraliteResult<ResolvedPlan> {
    let bands = coverage.bands;
    let check_band = |band: u8, role: &str| -> PyraliteResult<()> {
        if band >= bands {
            Err(PyraliteError::UnsupportedConfiguration(format!(
                "{role} 波段索引 {band} 超出波段数 {bands}"
            )))
        } else {
            Ok(())
        }
    };

    match *plan {
        BandPlan::Identity => Ok(ResolvedPlan {
            kind: PlanKind::Copy,
            out_sample: coverage.sample,
            out_pixel: coverage.pixel,
            out_bands: coverage.bands,
        }),
        BandPlan::Triple { r, g, b } => {
            if !matches!(coverage.pixel, PixelKind::Multiband | PixelKind::Rgb) {
                return Err(PyraliteError::UnsupportedConfiguration(format!(
                    "三波段提取要求 RGB 或多波段覆盖层,实际为 {:?}",
                    coverage.pixel
                )));
            }
            check_band(r, "红")?;
            check_band(g, "绿")?;
            check_band(b, "蓝")?;
            Ok(ResolvedPlan {
                kind: PlanKind::Triple { r, g, b },
                out_sample: coverage.sample,
                out_pixel: PixelKind::Rgb,
                out_bands: 3,
            })
        }
        BandPlan::Mono { band } => {
            check_band(band, "目标")?;
            // 整数样本输出灰度,浮点样本输出数据网格
            let out_pixel = if coverage.sample.is_integral() {
                PixelKind::Grayscale
            } else {
                PixelKind::DataGrid
            };
            Ok(ResolvedPlan {
                kind: PlanKind::Mono { band },
                out_sample: coverage.sample,
                out_pixel,
                out_bands: 1,
            })
        }
        BandPlan::Ndvi { red, nir } => {
            resolve_ndvi(coverage, red, nir, check_band)
        }
        BandPlan::AutoNdvi => {
            // 自动波段对: 约定第一波段为红,第二波段为近红外
            resolve_ndvi(coverage, 0, 1, check_band)
        }
    }
}

fn resolve_ndvi(
    coverage: &Coverage,
    red: u8,
    nir: u8,
    check_band: impl Fn(u8, &str) -> PyraliteResult<()>,
) -> PyraliteResult<ResolvedPlan> {
    if coverage.pixel != PixelKind::Multiband {
        return Err(PyraliteError::UnsupportedConfiguration(format!(
            "NDVI 要求多波段覆盖层,实际为 {:?}",
            coverage.pixel
        )));
    }
    check_band(red, "红")?;
    check_band(nir, "近红外")?;
    if red == nir {
        return Err(PyraliteError::UnsupportedConfiguration(
            "NDVI 的红与近红外波段不能相同".into(),
        ));
    }
    Ok(ResolvedPlan {
        kind: PlanKind::Ndvi { red, nir },
        out_sample: SampleKind::Float32,
        out_pixel: PixelKind::DataGrid,
        out_bands: 1,
    })
}

/// 目标缓冲区的底色填充值
///
/// 按波段方案从覆盖层的无数据值推导;NDVI 输出填充 0。
pub fn prime_fill(plan: &ResolvedPlan, coverage: &Coverage) -> Option<Vec<f64>> {
    let no_data = coverage.no_data.as_ref()?;
    match plan.kind {
        PlanKind::Copy => Some(no_data.clone()),
        PlanKind::Triple { r, g, b } => Some(vec![
            no_data.get(r as usize).copied().unwrap_or(0.0),
            no_data.get(g as usize).copied().unwrap_or(0.0),
            no_data.get(b as usize).copied().unwrap_or(0.0),
        ]),
        PlanKind::Mono { band } => Some(vec![no_data.get(band as usize).copied().unwrap_or(0.0)]),
        PlanKind::Ndvi { .. } => None,
    }
}

/// 将一个解码瓦片的贡献合成进目标缓冲区
///
/// 对瓦片足迹与目标范围交集内的每个输出像素:
/// 1. 若存在逐瓦片裁剪且像素中心不在裁剪内,跳过
/// 2. 最近映射回瓦片像素;映射出界的像素跳过
/// 3. 遮罩标记透明的像素跳过(目标保持底色)
/// 4. 样本值与配置的无数据值逐分量相等的像素跳过
/// 5. 否则按策略写入(可能经过波段选择/重映射)
pub fn compose_tile(
    tile: &PixelBuffer,
    tile_bbox: &BoundingBox,
    clip: Option<&MultiPolygon<f64>>,
    dest: &DestGeometry,
    sink: &PixelSink,
    plan: &ResolvedPlan,
    no_data: Option<&[f64]>,
) -> PyraliteResult<()> {
    let Some(overlap) = dest.bbox.intersection(tile_bbox) else {
        return Ok(());
    };
    if tile.width == 0 || tile.height == 0 {
        return Ok(());
    }

    // 瓦片像素分辨率由足迹与栅格尺寸推导,对抽取比例同样成立
    let tile_res_x = tile_bbox.width() / tile.width as f64;
    let tile_res_y = tile_bbox.height() / tile.height as f64;

    // 与交集重叠的目标像素范围,越界部分钳制掉
    let col_first = ((overlap.minx - dest.bbox.minx) / dest.x_res).floor().max(0.0) as u32;
    let col_last =
        (((overlap.maxx - dest.bbox.minx) / dest.x_res).ceil() as u32).min(dest.width);
    let row_first = ((dest.bbox.maxy - overlap.maxy) / dest.y_res).floor().max(0.0) as u32;
    let row_last =
        (((dest.bbox.maxy - overlap.miny) / dest.y_res).ceil() as u32).min(dest.height);

    let out_sample_bytes = plan.out_sample.byte_size();
    let out_pixel_bytes = plan.out_pixel_bytes();
    let tile_pixel_bytes = tile.pixel_bytes();

    for row in row_first..row_last {
        // 像素中心的地理坐标
        let gy = dest.bbox.maxy - (row as f64 + 0.5) * dest.y_res;
        let tile_row = ((tile_bbox.maxy - gy) / tile_res_y).floor();
        if tile_row < 0.0 || tile_row >= tile.height as f64 {
            continue;
        }
        let ty = tile_row as u32;

        for col in col_first..col_last {
            let gx = dest.bbox.minx + (col as f64 + 0.5) * dest.x_res;
            if let Some(clip) = clip {
                if !clip.contains(&Point::new(gx, gy)) {
                    continue;
                }
            }
            let tile_col = ((gx - tile_bbox.minx) / tile_res_x).floor();
            if tile_col < 0.0 || tile_col >= tile.width as f64 {
                continue;
            }
            let tx = tile_col as u32;

            // 透明优先级 (1): 遮罩先于一切,即使样本恰好等于无数据值
            if tile.is_masked(tx, ty) {
                continue;
            }

            let dest_offset =
                (row as usize * dest.width as usize + col as usize) * out_pixel_bytes;

            match plan.kind {
                PlanKind::Copy => {
                    // 透明优先级 (2): 逐分量与无数据值比较
                    if let Some(no_data) = no_data {
                        let mut all_equal = true;
                        for band in 0..tile.bands {
                            let value = tile.sample_value(tx, ty, band).unwrap_or(0.0);
                            if no_data.get(band as usize) != Some(&value) {
                                all_equal = false;
                                break;
                            }
                        }
                        if all_equal {
                            continue;
                        }
                    }
                    let src = tile.pixel_offset(tx, ty);
                    sink.write(dest_offset, &tile.buffer[src..src + tile_pixel_bytes]);
                }
                PlanKind::Triple { r, g, b } => {
                    let rv = tile.sample_value(tx, ty, r).unwrap_or(0.0);
                    let gv = tile.sample_value(tx, ty, g).unwrap_or(0.0);
                    let bv = tile.sample_value(tx, ty, b).unwrap_or(0.0);
                    if let Some(no_data) = no_data {
                        let nd = |band: u8| no_data.get(band as usize).copied();
                        if nd(r) == Some(rv) && nd(g) == Some(gv) && nd(b) == Some(bv) {
                            continue;
                        }
                    }
                    let mut out = [0u8; 24];
                    for (slot, value) in [rv, gv, bv].into_iter().enumerate() {
                        let encoded = encode_sample(value, plan.out_sample);
                        out[slot * out_sample_bytes..(slot + 1) * out_sample_bytes]
                            .copy_from_slice(&encoded[..out_sample_bytes]);
                    }
                    sink.write(dest_offset, &out[..out_pixel_bytes]);
                }
                PlanKind::Mono { band } => {
                    let value = tile.sample_value(tx, ty, band).unwrap_or(0.0);
                    if let Some(no_data) = no_data {
                        if no_data.get(band as usize) == Some(&value) {
                            continue;
                        }
                    }
                    let encoded = encode_sample(value, plan.out_sample);
                    sink.write(dest_offset, &encoded[..out_sample_bytes]);
                }
                PlanKind::Ndvi { red, nir } => {
                    let red_value = tile.sample_value(tx, ty, red).unwrap_or(0.0);
                    let nir_value = tile.sample_value(tx, ty, nir).unwrap_or(0.0);
                    if let Some(no_data) = no_data {
                        let nd = |band: u8| no_data.get(band as usize).copied();
                        if nd(red) == Some(red_value) && nd(nir) == Some(nir_value) {
                            continue;
                        }
                    }
                    let denominator = nir_value + red_value;
                    if denominator == 0.0 {
                        continue;
                    }
                    let ndvi = (nir_value - red_value) / denominator;
                    let encoded = encode_sample(ndvi, plan.out_sample);
                    sink.write(dest_offset, &encoded[..out_sample_bytes]);
                }
            }
        }
    }
    Ok(())
}
