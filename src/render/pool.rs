//! 瓦片解码工作池模块
//!
//! 本模块实现了有界并发的瓦片解码/合成流水线:
//!
//! - 工作者数量 = min(请求的最大线程数, 64),至少为 1
//! - 瓦片按 `workers` 大小的固定突发分派;一个突发作为
//!   `workers` 个并行任务执行,协调者阻塞直到突发内全部任务
//!   完成、清理每任务的暂存状态,再分派下一个突发
//! - 每个工作者任务: 把瓦片载荷字节解码为像素栅格,随后立即
//!   调用合成器把该瓦片的贡献写入目标缓冲区,然后释放解码暂存
//! - 突发内任一工作者失败即中止整个检索(致命,不重试),
//!   不存在部分结果模式
//!
//! 工作者线程以命名线程启动;"最低调度优先级"只是尽力而为的
//! 提示,不是正确性要求。

use crate::codec::{self, CodecError};
use crate::coverage::{PyraliteError, PyraliteResult};
use crate::raster::{PixelBuffer, PixelKind, SampleKind};
use crate::render::compose::{self, DestGeometry, ResolvedPlan};
use crate::render::locator::LocatedTile;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::ptr;
use std::sync::Arc;
use tracing::debug;

/// 工作者数量上限
pub const MAX_WORKERS: usize = 64;

/// 一次检索的工作池统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// 执行的突发数
    pub bursts: usize,
    /// 处理的瓦片数
    pub tiles: usize,
    /// 实际工作者数量
    pub workers: usize,
}

/// 一个待处理的瓦片任务
#[derive(Debug)]
pub struct TileJob {
    /// 定位阶段产出的瓦片描述
    pub tile: LocatedTile,
    /// 任务数据: 待解码载荷或缓存命中的解码栅格
    pub data: JobData,
}

/// 任务携带的数据
#[derive(Debug)]
pub enum JobData {
    /// 从存储取出的载荷字节,由工作者解码
    Payload(Vec<u8>),
    /// 显式缓存命中的解码栅格,跳过解码直接合成
    Decoded(Arc<PixelBuffer>),
}

/// 解码瓦片必须满足的覆盖层形状
#[derive(Debug, Clone, Copy)]
pub struct ExpectedShape {
    pub sample: SampleKind,
    pub pixel: PixelKind,
    pub bands: u8,
}

/// 目标缓冲区的共享写入器
///
/// 对目标缓冲区的写入不加任何同步。这只因为一个不变式才是
/// 健全的: 同一 (剖分, 层级) 的瓦片足迹恰好且互不重叠地铺满
/// 剖分足迹,因此同一突发内的并发工作者写入的目标字节区间
/// 两两不相交。写入越界时恐慌。
pub struct PixelSink {
    ptr: *mut u8,
    len: usize,
}

// 安全性: 见上。不相交写入不构成数据竞争;PixelSink 的生命周期
// 被限制在借用目标缓冲区的检索调用内。
unsafe impl Send for PixelSink {}
unsafe impl Sync for PixelSink {}

impl PixelSink {
    /// 包装目标缓冲区
    pub fn new(buffer: &mut [u8]) -> Self {
        Self {
            ptr: buffer.as_mut_ptr(),
            len: buffer.len(),
        }
    }

    /// 向指定偏移量写入字节
    pub fn write(&self, offset: usize, bytes: &[u8]) {
        assert!(
            offset + bytes.len() <= self.len,
            "目标缓冲区写入越界: {} + {} > {}",
            offset,
            bytes.len(),
            self.len
        );
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
        }
    }
}

/// 有界突发解码工作池
pub struct DecodePool {
    workers: usize,
    pool: ThreadPool,
}

impl DecodePool {
    /// 构造一个工作池
    ///
    /// 工作者数量被钳制到 [1, 64]。
    pub fn new(max_threads: usize) -> PyraliteResult<Self> {
        let workers = max_threads.clamp(1, MAX_WORKERS);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("pyralite-decode-{index}"))
            .build()
            .map_err(|e| PyraliteError::DecodePool(format!("{e:?}")))?;
        Ok(Self { workers, pool })
    }

    /// 实际工作者数量
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 按突发执行全部瓦片任务
    ///
    /// 每个突发的任务并行执行并在突发边界汇合(结构化并发);
    /// 突发之间没有重叠。任一任务失败立即中止,剩余突发不再
    /// 分派,已合成的部分输出被调用者丢弃。
    ///
    /// `on_decoded` 在协调者线程上对每个新解码的栅格调用一次,
    /// 用于填充显式的解码瓦片缓存。
    pub fn run(
        &self,
        jobs: Vec<TileJob>,
        expected: ExpectedShape,
        dest: &DestGeometry,
        sink: &PixelSink,
        plan: &ResolvedPlan,
        no_data: Option<&[f64]>,
        mut on_decoded: impl FnMut(i64, Arc<PixelBuffer>),
    ) -> PyraliteResult<PoolStats> {
        let tiles = jobs.len();
        let mut bursts = 0usize;

        for burst in jobs.chunks(self.workers) {
            bursts += 1;
            // 突发作为并行任务集合执行,collect 即突发汇合点
            let results: Vec<PyraliteResult<Option<(i64, Arc<PixelBuffer>)>>> =
                self.pool.install(|| {
                    burst
                        .par_iter()
                        .map(|job| process_job(job, expected, dest, sink, plan, no_data))
                        .collect()
                });
            // 任一工作者失败即中止整个检索
            for result in results {
                if let Some((tile_id, raster)) = result? {
                    on_decoded(tile_id, raster);
                }
            }
            // 突发的任务数据在此释放(每任务暂存状态清理)
        }

        debug!(tiles, bursts, workers = self.workers, "解码突发完成");
        Ok(PoolStats {
            bursts,
            tiles,
            workers: self.workers,
        })
    }
}

/// 单个工作者任务: 解码 + 立即合成
fn process_job(
    job: &TileJob,
    expected: ExpectedShape,
    dest: &DestGeometry,
    sink: &PixelSink,
    plan: &ResolvedPlan,
    no_data: Option<&[f64]>,
) -> PyraliteResult<Option<(i64, Arc<PixelBuffer>)>> {
    let (raster, freshly_decoded) = match &job.data {
        JobData::Decoded(raster) => (Arc::clone(raster), false),
        JobData::Payload(payload) => (Arc::new(codec::decode(payload)?), true),
    };

    // 解码结果必须与覆盖层配置一致
    if raster.sample != expected.sample
        || raster.pixel != expected.pixel
        || raster.bands != expected.bands
    {
        return Err(PyraliteError::TileDecode(CodecError::UnsupportedShape((
            raster.sample,
            raster.pixel,
            raster.bands,
        ))));
    }

    compose::compose_tile(
        &raster,
        &job.tile.bbox,
        job.tile.clip.as_ref(),
        dest,
        sink,
        plan,
        no_data,
    )?;

    Ok(freshly_decoded.then(|| (job.tile.tile_id, raster)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TileCodec;
    use crate::geometry::BoundingBox;
    use crate::render::compose::{BandPlan, resolve_plan};
    use crate::coverage::{Coverage, CoveragePolicies};

    fn coverage() -> Coverage {
        Coverage {
            name: "pool".into(),
            sample: SampleKind::UInt8,
            pixel: PixelKind::Grayscale,
            bands: 1,
            codec: TileCodec::Deflate,
            tile_width: 2,
            tile_height: 2,
            srid: 3857,
            x_res: 1.0,
            y_res: 1.0,
            no_data: None,
            palette: None,
            policies: CoveragePolicies::default(),
            extent: None,
        }
    }

    fn job(col: u32, value: u8) -> TileJob {
        let raster = PixelBuffer::new(
            2,
            2,
            SampleKind::UInt8,
            PixelKind::Grayscale,
            1,
            vec![value; 4],
            None,
            None,
        )
        .unwrap();
        let payload = codec::encode(&raster, TileCodec::Deflate).unwrap();
        TileJob {
            tile: LocatedTile {
                tile_id: col as i64,
                section_id: 1,
                bbox: BoundingBox::new(col as f64 * 2.0, 0.0, (col + 1) as f64 * 2.0, 2.0),
                clip: None,
            },
            data: JobData::Payload(payload),
        }
    }

    fn run_jobs(max_threads: usize, jobs: Vec<TileJob>) -> (PoolStats, PixelBuffer) {
        let coverage = coverage();
        let plan = resolve_plan(&BandPlan::Identity, &coverage).unwrap();
        let tile_count = jobs.len() as u32;
        let dest = DestGeometry::new(
            BoundingBox::new(0.0, 0.0, tile_count as f64 * 2.0, 2.0),
            tile_count * 2,
            2,
        );
        let mut buffer = PixelBuffer::primed(
            dest.width,
            dest.height,
            plan.out_sample,
            plan.out_pixel,
            plan.out_bands,
            None,
        )
        .unwrap();
        let expected = ExpectedShape {
            sample: coverage.sample,
            pixel: coverage.pixel,
            bands: coverage.bands,
        };
        let pool = DecodePool::new(max_threads).unwrap();
        let sink = PixelSink::new(&mut buffer.buffer);
        let stats = pool
            .run(jobs, expected, &dest, &sink, &plan, None, |_, _| {})
            .unwrap();
        (stats, buffer)
    }

    #[test]
    fn five_tiles_with_two_workers_take_three_bursts() {
        let jobs: Vec<TileJob> = (0..5).map(|col| job(col, col as u8 + 1)).collect();
        let (stats, buffer) = run_jobs(2, jobs);
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.tiles, 5);
        // 突发分组 2,2,1
        assert_eq!(stats.bursts, 3);

        // 并行结果与串行结果一致
        let serial_jobs: Vec<TileJob> = (0..5).map(|col| job(col, col as u8 + 1)).collect();
        let (serial_stats, serial_buffer) = run_jobs(1, serial_jobs);
        assert_eq!(serial_stats.bursts, 5);
        assert_eq!(buffer.buffer, serial_buffer.buffer);
    }

    #[test]
    fn worker_count_is_clamped() {
        assert_eq!(DecodePool::new(0).unwrap().workers(), 1);
        assert_eq!(DecodePool::new(200).unwrap().workers(), MAX_WORKERS);
    }

    #[test]
    fn corrupt_payload_aborts_the_run() {
        let mut jobs: Vec<TileJob> = (0..3).map(|col| job(col, 1)).collect();
        // 损坏中间瓦片的载荷
        if let JobData::Payload(payload) = &mut jobs[1].data {
            payload.truncate(8);
        }
        let coverage = coverage();
        let plan = resolve_plan(&BandPlan::Identity, &coverage).unwrap();
        let dest = DestGeometry::new(BoundingBox::new(0.0, 0.0, 6.0, 2.0), 6, 2);
        let mut buffer =
            PixelBuffer::primed(6, 2, SampleKind::UInt8, PixelKind::Grayscale, 1, None).unwrap();
        let expected = ExpectedShape {
            sample: coverage.sample,
            pixel: coverage.pixel,
            bands: coverage.bands,
        };
        let pool = DecodePool::new(2).unwrap();
        let sink = PixelSink::new(&mut buffer.buffer);
        let result = pool.run(jobs, expected, &dest, &sink, &plan, None, |_, _| {});
        assert!(matches!(result, Err(PyraliteError::TileDecode(_))));
    }
}
