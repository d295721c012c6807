//! 检索渲染模块
//!
//! 本模块把各组件组合为一次检索调用的完整流水线:
//!
//! ```text
//! Init(底色填充) → 分辨率匹配 → 瓦片定位(+切割线)
//!   → [解码突发]* → (可选山体阴影扫描) → 完成
//! ```
//!
//! 任何解码失败或分辨率匹配失败都直接转入终止失败,不重试。
//! 调用方要么得到完整合成的缓冲区,要么得到单个终止错误。
//!
//! 渲染参数通过 [`RenderBuilder`] 配置;
//! [`PyramidStore::render_extent`] 是 WMS 层与导出工具消费的
//! 单一操作。

use crate::coverage::{find_matching_resolution, Coverage, PyraliteError, PyraliteResult};
use crate::cutline::{build_cutline, CutlineMode};
use crate::geometry::BoundingBox;
use crate::raster::{PixelBuffer, PixelKind};
use crate::schema::PyramidStore;
use geo::Geometry;
use tracing::debug;

pub mod cache;
pub mod compose;
pub mod locator;
pub mod pool;
pub mod style;

pub use cache::TileCache;
pub use compose::{BandPlan, DestGeometry};
pub use locator::LocatedTile;
pub use pool::{DecodePool, PoolStats, MAX_WORKERS};
pub use style::{RasterStyle, ShadedRelief};

use pool::{ExpectedShape, JobData, PixelSink, TileJob};

/// 检索调用的渲染构建器
///
/// 携带范围、输出尺寸、波段方案、样式、切割线、线程上限
/// 与可选的解码瓦片缓存。
pub struct RenderBuilder<'a> {
    store: &'a PyramidStore,
    coverage: &'a Coverage,
    section_id: Option<i64>,
    bbox: Option<BoundingBox>,
    width: u32,
    height: u32,
    plan: BandPlan,
    style: Option<RasterStyle>,
    cutline: Option<(Geometry<f64>, i32, CutlineMode)>,
    max_threads: usize,
    cache: Option<&'a mut TileCache>,
}

impl PyramidStore {
    /// 为一个覆盖层创建渲染构建器
    pub fn renderer<'a>(&'a self, coverage: &'a Coverage) -> RenderBuilder<'a> {
        RenderBuilder {
            store: self,
            coverage,
            section_id: None,
            bbox: None,
            width: 0,
            height: 0,
            plan: BandPlan::Identity,
            style: None,
            cutline: None,
            max_threads: 1,
            cache: None,
        }
    }

    /// 渲染一个地理范围
    ///
    /// 这是检索引擎对外暴露的单一操作。
    #[allow(clippy::too_many_arguments)]
    pub fn render_extent(
        &self,
        coverage_name: &str,
        section_id: Option<i64>,
        bbox: BoundingBox,
        width: u32,
        height: u32,
        plan: BandPlan,
        style: Option<RasterStyle>,
        cutline: Option<(Geometry<f64>, i32, CutlineMode)>,
    ) -> PyraliteResult<PixelBuffer> {
        let coverage = self.get_coverage(coverage_name)?;
        let mut builder = self
            .renderer(&coverage)
            .of_extent(bbox)
            .with_size(width, height)
            .with_band_plan(plan);
        builder.section_id = section_id;
        builder.style = style;
        builder.cutline = cutline;
        builder.render()
    }
}

impl<'a> RenderBuilder<'a> {
    /// 设置输出的地理范围
    pub fn of_extent(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// 设置输出的像素尺寸
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// 限定到一个剖分
    pub fn of_section(mut self, section_id: i64) -> Self {
        self.section_id = Some(section_id);
        self
    }

    /// 设置波段方案
    pub fn with_band_plan(mut self, plan: BandPlan) -> Self {
        self.plan = plan;
        self
    }

    /// 设置样式
    pub fn with_style(mut self, style: RasterStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// 设置切割线几何
    pub fn with_cutline(
        mut self,
        geometry: Geometry<f64>,
        srid: i32,
        mode: CutlineMode,
    ) -> Self {
        self.cutline = Some((geometry, srid, mode));
        self
    }

    /// 设置解码工作者线程上限
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// 附加一个显式的解码瓦片缓存
    pub fn with_tile_cache(mut self, tile_cache: &'a mut TileCache) -> Self {
        self.cache = Some(tile_cache);
        self
    }

    /// 执行检索
    pub fn render(mut self) -> PyraliteResult<PixelBuffer> {
        let coverage = self.coverage;
        let Some(mut bbox) = self.bbox else {
            return Err(PyraliteError::UnsupportedConfiguration(
                "未设置渲染范围".into(),
            ));
        };
        if self.width == 0 || self.height == 0 {
            return Err(PyraliteError::UnsupportedConfiguration(format!(
                "非法的输出尺寸: {}x{}",
                self.width, self.height
            )));
        }
        if !bbox.is_valid() {
            return Err(PyraliteError::UnsupportedConfiguration(format!(
                "非法的渲染范围: {bbox}"
            )));
        }

        // 波段方案在任何 I/O 之前解析并校验一次
        let plan = compose::resolve_plan(&self.plan, coverage)?;

        // 山体阴影的前置校验同样在 I/O 之前
        if let Some(relief) = self.style.as_ref().and_then(|s| s.shaded_relief.as_ref()) {
            if plan.out_pixel != PixelKind::Rgb
                || plan.out_sample != crate::raster::SampleKind::UInt8
            {
                return Err(PyraliteError::UnsupportedConfiguration(
                    "山体阴影要求 8 位 RGB 输出".into(),
                ));
            }
            let pixels = self.width as usize * self.height as usize;
            if relief.coefficients.len() != pixels {
                return Err(PyraliteError::UnsupportedConfiguration(format!(
                    "山体阴影系数数量 {} 与像素数 {} 不符",
                    relief.coefficients.len(),
                    pixels
                )));
            }
        }

        // 切割线构造先于空间查询;crop 模式会改写查询范围
        let cutline = match &self.cutline {
            Some((geometry, srid, mode)) => {
                build_cutline(geometry, *srid, coverage.srid, *mode, &mut bbox)?
            }
            None => None,
        };

        // 请求分辨率由最终范围与输出尺寸决定
        let requested_x_res = bbox.width() / self.width as f64;
        let requested_y_res = bbox.height() / self.height as f64;

        // 逐剖分分辨率的覆盖层必须声明剖分
        if coverage.policies.mixed_resolutions && self.section_id.is_none() {
            return Err(PyraliteError::NoMatchingResolution((
                requested_x_res,
                requested_y_res,
            )));
        }

        let level_rows = self.store.level_resolutions(coverage, self.section_id)?;
        let matched = find_matching_resolution(&level_rows, requested_x_res, requested_y_res)
            .ok_or(PyraliteError::NoMatchingResolution((
                requested_x_res,
                requested_y_res,
            )))?;
        debug!(
            coverage = coverage.name.as_str(),
            pyramid_level = matched.pyramid_level,
            scale = matched.scale.factor(),
            "分辨率匹配完成"
        );

        // 底色填充必须在任何解码突发之前完成
        let fill = compose::prime_fill(&plan, coverage);
        let mut dest_buffer = PixelBuffer::primed(
            self.width,
            self.height,
            plan.out_sample,
            plan.out_pixel,
            plan.out_bands,
            fill.as_deref(),
        )?;
        // 调色板输出携带覆盖层的调色板
        if plan.out_pixel == PixelKind::Palette {
            dest_buffer.palette = coverage.palette.clone();
        }

        let dest = DestGeometry::new(bbox, self.width, self.height);

        let tiles = locator::locate_tiles(
            self.store,
            coverage,
            matched.pyramid_level,
            &bbox,
            self.section_id,
            cutline.as_ref(),
        )?;

        if !tiles.is_empty() {
            let mut tile_cache = self.cache.take();
            let scale = matched.scale;

            // 载荷在协调者上取出,解码与合成在工作者上执行;
            // 每个工作者持有自己的数据副本,不共享读句柄
            let mut jobs = Vec::with_capacity(tiles.len());
            for tile in tiles {
                let data = match tile_cache
                    .as_mut()
                    .and_then(|c| c.get(tile.tile_id, scale))
                {
                    Some(raster) => JobData::Decoded(raster),
                    None => JobData::Payload(
                        self.store.tile_payload(coverage, tile.tile_id, scale)?,
                    ),
                };
                jobs.push(TileJob { tile, data });
            }

            let pool = DecodePool::new(self.max_threads)?;
            let expected = ExpectedShape {
                sample: coverage.sample,
                pixel: coverage.pixel,
                bands: coverage.bands,
            };
            let sink = PixelSink::new(&mut dest_buffer.buffer);
            let stats = pool.run(
                jobs,
                expected,
                &dest,
                &sink,
                &plan,
                coverage.no_data.as_deref(),
                |tile_id, raster| {
                    if let Some(c) = tile_cache.as_mut() {
                        c.put(tile_id, scale, raster);
                    }
                },
            )?;
            debug!(
                bursts = stats.bursts,
                tiles = stats.tiles,
                workers = stats.workers,
                "合成完成"
            );
        }

        // 山体阴影作为第二次完整缓冲区扫描,在所有突发之后执行
        if let Some(relief) = self.style.as_ref().and_then(|s| s.shaded_relief.as_ref()) {
            style::apply_shaded_relief(&mut dest_buffer, relief)?;
        }

        Ok(dest_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TileCodec;
    use crate::coverage::{CoveragePolicies, LevelResolutions, TileScale};
    use crate::raster::SampleKind;
    use crate::schema::SectionDef;
    use geo::polygon;

    /// 构造一个 8x8 像素的覆盖层: 一个剖分,层级 0,
    /// 2x2 的 4x4 像素瓦片网格,瓦片值按 (行*2+列+1)*10 填充
    fn build_store(no_data: Option<Vec<f64>>) -> (PyramidStore, Coverage) {
        let mut store = PyramidStore::open_in_memory().unwrap();
        let coverage = Coverage {
            name: "ortho".into(),
            sample: SampleKind::UInt8,
            pixel: PixelKind::Grayscale,
            bands: 1,
            codec: TileCodec::Deflate,
            tile_width: 4,
            tile_height: 4,
            srid: 3857,
            x_res: 1.0,
            y_res: 1.0,
            no_data,
            palette: None,
            policies: CoveragePolicies::default(),
            extent: None,
        };
        store.create_coverage(&coverage).unwrap();
        let section = store
            .insert_section(
                &coverage,
                &SectionDef {
                    name: "s1".into(),
                    width: 8,
                    height: 8,
                    footprint: BoundingBox::new(0.0, 0.0, 8.0, 8.0).to_polygon(),
                    file_path: None,
                    md5: None,
                    summary: None,
                },
            )
            .unwrap();
        store
            .insert_level_resolutions(
                &coverage,
                &LevelResolutions::from_native(
                    0,
                    1.0,
                    1.0,
                    &[TileScale::Full, TileScale::Half],
                ),
            )
            .unwrap();
        for row in 0..2u32 {
            for col in 0..2u32 {
                let value = ((row * 2 + col + 1) * 10) as u8;
                let tile = PixelBuffer::new(
                    4,
                    4,
                    SampleKind::UInt8,
                    PixelKind::Grayscale,
                    1,
                    vec![value; 16],
                    None,
                    None,
                )
                .unwrap();
                // 地理 y 轴向上: 第 0 行瓦片在上方
                let bbox = BoundingBox::new(
                    col as f64 * 4.0,
                    8.0 - (row + 1) as f64 * 4.0,
                    (col + 1) as f64 * 4.0,
                    8.0 - row as f64 * 4.0,
                );
                store.put_tile(&coverage, section, 0, &bbox, &tile).unwrap();
            }
        }
        (store, coverage)
    }

    #[test]
    fn identity_render_reassembles_the_grid() {
        let (store, coverage) = build_store(None);
        let out = store
            .renderer(&coverage)
            .of_extent(BoundingBox::new(0.0, 0.0, 8.0, 8.0))
            .with_size(8, 8)
            .render()
            .unwrap();
        // 左上像素来自瓦片 (0,0),右下像素来自瓦片 (1,1)
        assert_eq!(out.sample_value(0, 0, 0), Some(10.0));
        assert_eq!(out.sample_value(7, 0, 0), Some(20.0));
        assert_eq!(out.sample_value(0, 7, 0), Some(30.0));
        assert_eq!(out.sample_value(7, 7, 0), Some(40.0));
    }

    #[test]
    fn render_is_idempotent() {
        let (store, coverage) = build_store(Some(vec![0.0]));
        let render = || {
            store
                .renderer(&coverage)
                .of_extent(BoundingBox::new(1.0, 1.0, 7.0, 7.0))
                .with_size(6, 6)
                .with_max_threads(4)
                .render()
                .unwrap()
        };
        assert_eq!(render().buffer, render().buffer);
    }

    #[test]
    fn out_of_extent_render_stays_primed() {
        let (store, coverage) = build_store(Some(vec![77.0]));
        let out = store
            .renderer(&coverage)
            .of_extent(BoundingBox::new(100.0, 100.0, 108.0, 108.0))
            .with_size(8, 8)
            .render()
            .unwrap();
        assert!(out.buffer.iter().all(|v| *v == 77));
    }

    #[test]
    fn no_matching_resolution_is_fatal() {
        let (store, coverage) = build_store(None);
        // 范围 8x8,输出 5x5 → 请求分辨率 1.6,不在 1.0/2.0 的 1% 容差内
        let result = store
            .renderer(&coverage)
            .of_extent(BoundingBox::new(0.0, 0.0, 8.0, 8.0))
            .with_size(5, 5)
            .render();
        assert!(matches!(
            result,
            Err(PyraliteError::NoMatchingResolution(_))
        ));
    }

    #[test]
    fn half_scale_render_decimates_tiles() {
        let (store, coverage) = build_store(None);
        // 请求分辨率 2.0 → 层级 0 的 1:2 列命中
        let out = store
            .renderer(&coverage)
            .of_extent(BoundingBox::new(0.0, 0.0, 8.0, 8.0))
            .with_size(4, 4)
            .render()
            .unwrap();
        assert_eq!((out.width, out.height), (4, 4));
        assert_eq!(out.sample_value(0, 0, 0), Some(10.0));
        assert_eq!(out.sample_value(3, 3, 0), Some(40.0));
    }

    #[test]
    fn mixed_resolution_requires_section() {
        let mut store = PyramidStore::open_in_memory().unwrap();
        let coverage = Coverage {
            name: "mixed".into(),
            sample: SampleKind::UInt8,
            pixel: PixelKind::Grayscale,
            bands: 1,
            codec: TileCodec::None,
            tile_width: 4,
            tile_height: 4,
            srid: 3857,
            x_res: 1.0,
            y_res: 1.0,
            no_data: None,
            palette: None,
            policies: CoveragePolicies {
                mixed_resolutions: true,
                ..CoveragePolicies::default()
            },
            extent: None,
        };
        store.create_coverage(&coverage).unwrap();
        let result = store
            .renderer(&coverage)
            .of_extent(BoundingBox::new(0.0, 0.0, 4.0, 4.0))
            .with_size(4, 4)
            .render();
        assert!(matches!(
            result,
            Err(PyraliteError::NoMatchingResolution(_))
        ));
    }

    #[test]
    fn mask_takes_precedence_over_no_data() {
        // 瓦片像素 (0,0): 遮罩透明且样本等于无数据值;
        // 像素 (1,0): 样本等于无数据值但未被遮罩;
        // 像素 (2,0): 正常样本。
        let mut store = PyramidStore::open_in_memory().unwrap();
        let coverage = Coverage {
            name: "masked".into(),
            sample: SampleKind::UInt8,
            pixel: PixelKind::Grayscale,
            bands: 1,
            codec: TileCodec::Deflate,
            tile_width: 4,
            tile_height: 1,
            srid: 3857,
            x_res: 1.0,
            y_res: 1.0,
            no_data: Some(vec![5.0]),
            palette: None,
            policies: CoveragePolicies::default(),
            extent: None,
        };
        store.create_coverage(&coverage).unwrap();
        let section = store
            .insert_section(
                &coverage,
                &SectionDef {
                    name: "s1".into(),
                    width: 4,
                    height: 1,
                    footprint: BoundingBox::new(0.0, 0.0, 4.0, 1.0).to_polygon(),
                    file_path: None,
                    md5: None,
                    summary: None,
                },
            )
            .unwrap();
        store
            .insert_level_resolutions(
                &coverage,
                &LevelResolutions::from_native(0, 1.0, 1.0, &[TileScale::Full]),
            )
            .unwrap();
        let tile = PixelBuffer::new(
            4,
            1,
            SampleKind::UInt8,
            PixelKind::Grayscale,
            1,
            vec![5, 5, 9, 9],
            Some(vec![0, 1, 1, 1]),
            None,
        )
        .unwrap();
        store
            .put_tile(
                &coverage,
                section,
                0,
                &BoundingBox::new(0.0, 0.0, 4.0, 1.0),
                &tile,
            )
            .unwrap();

        let out = store
            .renderer(&coverage)
            .of_extent(BoundingBox::new(0.0, 0.0, 4.0, 1.0))
            .with_size(4, 1)
            .render()
            .unwrap();
        // 底色为无数据值 5
        assert_eq!(out.sample_value(0, 0, 0), Some(5.0)); // 遮罩优先,保持底色
        assert_eq!(out.sample_value(1, 0, 0), Some(5.0)); // 无数据相等,保持底色
        assert_eq!(out.sample_value(2, 0, 0), Some(9.0)); // 正常写入
    }

    #[test]
    fn cutline_limits_written_pixels() {
        let (store, coverage) = build_store(Some(vec![0.0]));
        // 覆盖左半边的五边形切割线
        let clip = polygon![
            (x: 0.0, y: 0.0),
            (x: 4.0, y: 0.0),
            (x: 3.0, y: 4.0),
            (x: 4.0, y: 8.0),
            (x: 0.0, y: 8.0),
            (x: 0.0, y: 0.0),
        ];
        let out = store
            .renderer(&coverage)
            .of_extent(BoundingBox::new(0.0, 0.0, 8.0, 8.0))
            .with_size(8, 8)
            .with_cutline(Geometry::Polygon(clip), 3857, CutlineMode::IntersectBbox)
            .render()
            .unwrap();
        // 切割线外的右侧像素保持底色
        assert_eq!(out.sample_value(7, 0, 0), Some(0.0));
        assert_eq!(out.sample_value(7, 7, 0), Some(0.0));
        // 切割线内的左侧像素被写入
        assert_eq!(out.sample_value(0, 0, 0), Some(10.0));
        assert_eq!(out.sample_value(0, 7, 0), Some(30.0));
    }

    #[test]
    fn rejected_cutline_renders_without_clipping() {
        let (store, coverage) = build_store(Some(vec![0.0]));
        // 裸包络矩形被拒绝,按无切割线继续
        let envelope = polygon![
            (x: 0.0, y: 0.0),
            (x: 4.0, y: 0.0),
            (x: 4.0, y: 4.0),
            (x: 0.0, y: 4.0),
            (x: 0.0, y: 0.0),
        ];
        let out = store
            .renderer(&coverage)
            .of_extent(BoundingBox::new(0.0, 0.0, 8.0, 8.0))
            .with_size(8, 8)
            .with_cutline(Geometry::Polygon(envelope), 3857, CutlineMode::IntersectBbox)
            .render()
            .unwrap();
        // 全部像素都被写入
        assert_eq!(out.sample_value(7, 7, 0), Some(40.0));
    }

    #[test]
    fn parallel_and_serial_renders_agree() {
        let (store, coverage) = build_store(Some(vec![0.0]));
        let render = |threads: usize| {
            store
                .renderer(&coverage)
                .of_extent(BoundingBox::new(0.0, 0.0, 8.0, 8.0))
                .with_size(8, 8)
                .with_max_threads(threads)
                .render()
                .unwrap()
        };
        let serial = render(1);
        for threads in [2, 4, 64] {
            assert_eq!(render(threads).buffer, serial.buffer);
        }
    }

    #[test]
    fn tile_cache_is_filled_and_reused() {
        let (store, coverage) = build_store(None);
        let mut cache = TileCache::new(8);
        let first = store
            .renderer(&coverage)
            .of_extent(BoundingBox::new(0.0, 0.0, 8.0, 8.0))
            .with_size(8, 8)
            .with_tile_cache(&mut cache)
            .render()
            .unwrap();
        assert_eq!(cache.len(), 4);
        let second = store
            .renderer(&coverage)
            .of_extent(BoundingBox::new(0.0, 0.0, 8.0, 8.0))
            .with_size(8, 8)
            .with_tile_cache(&mut cache)
            .render()
            .unwrap();
        assert_eq!(first.buffer, second.buffer);
    }

    #[test]
    fn written_destination_regions_are_disjoint() {
        // 合成的不相交性质: 对合成网格逐瓦片单独运行,
        // 任何目标像素最多被一个瓦片写入
        let (store, coverage) = build_store(None);
        let bbox = BoundingBox::new(0.0, 0.0, 8.0, 8.0);
        let dest = DestGeometry::new(bbox, 8, 8);
        let plan = compose::resolve_plan(&BandPlan::Identity, &coverage).unwrap();
        let tiles =
            locator::locate_tiles(&store, &coverage, 0, &bbox, None, None).unwrap();
        assert_eq!(tiles.len(), 4);

        let mut write_counts = vec![0u32; 64];
        for tile in &tiles {
            let payload = store
                .tile_payload(&coverage, tile.tile_id, TileScale::Full)
                .unwrap();
            let raster = crate::codec::decode(&payload).unwrap();
            let mut scratch = PixelBuffer::primed(
                8,
                8,
                plan.out_sample,
                plan.out_pixel,
                plan.out_bands,
                None,
            )
            .unwrap();
            let sink = PixelSink::new(&mut scratch.buffer);
            compose::compose_tile(&raster, &tile.bbox, None, &dest, &sink, &plan, None)
                .unwrap();
            for (index, value) in scratch.buffer.iter().enumerate() {
                if *value != 0 {
                    write_counts[index] += 1;
                }
            }
        }
        // 每个目标像素恰好被一个瓦片写入
        assert!(write_counts.iter().all(|count| *count == 1));
    }
}
