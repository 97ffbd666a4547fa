//! Parallel tier-1 coding of code blocks.
//!
//! The entropy coder itself is a capability the caller plugs in via
//! [`BlockCoder`]; this module owns the scheduling: fanning a batch of
//! code-block jobs out to a worker pool, keeping one reusable coder
//! context per worker, and folding per-block distortion into the tile
//! accumulator when rate control asks for it.

use crate::component::SubBandType;
use crate::error::BlockError;
use crate::quant::StepSize;
use crate::rect::IntRect;
use log::{trace, warn};
use smallvec::SmallVec;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One coding pass produced while encoding a block.
#[derive(Debug, Clone, Copy)]
pub struct PassInfo {
    /// The cumulated rate after this pass, in bytes.
    pub rate: u32,
    /// How much the pass decreases the block's distortion.
    pub distortion_decrease: f64,
    /// The length of the pass data, in bytes.
    pub length: u32,
}

/// The outcome of encoding one code block.
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    /// The compressed bytes.
    pub data: Vec<u8>,
    /// The coding passes, in coding order.
    pub passes: SmallVec<[PassInfo; 8]>,
    /// The number of magnitude bit planes actually coded.
    pub num_bit_planes: u8,
    /// The total distortion attributed to the block.
    pub distortion: f64,
}

/// The outcome of decoding one code block.
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    /// The decoded coefficients, row-major at the block's width.
    pub samples: Vec<i32>,
    /// How many coding passes were actually decoded.
    pub num_passes: u32,
}

/// What a code-block job operates on.
pub enum JobInput<'a> {
    /// Coefficients to compress: a view into a sub-band sample plane
    /// with the given row stride.
    Plane {
        /// The plane samples, starting at the block's top-left corner.
        samples: &'a [i32],
        /// The plane's row stride.
        stride: u32,
    },
    /// A compressed stream to decode.
    Stream(&'a [u8]),
}

/// An immutable descriptor for coding one code block.
///
/// Jobs are created by the tile layer, consumed exactly once by a
/// worker and dropped once the batch result has been merged.
pub struct CodeBlockJob<'a> {
    /// The block rectangle, in its band's coordinates.
    pub rect: IntRect,
    /// The sub-band the block belongs to.
    pub band: SubBandType,
    /// The resolution level of the band.
    pub level: u8,
    /// The quantization step size that applies to the block.
    pub step: StepSize,
    /// The number of magnitude bit planes of the band.
    pub num_bit_planes: u8,
    /// The block's input data.
    pub input: JobInput<'a>,
}

/// The entropy-coding capability for a single code block.
///
/// `encode` and `decode` are called concurrently from worker threads
/// and must not touch shared state; all per-call scratch lives in the
/// [`BlockCoder::Context`], of which each worker owns one.
pub trait BlockCoder: Sync {
    /// Reusable per-worker working state (scratch buffers, context
    /// tables).
    type Context: Send;

    /// Create one worker context.
    fn new_context(&self) -> Self::Context;

    /// Compress one code block.
    fn encode(
        &self,
        ctx: &mut Self::Context,
        job: &CodeBlockJob<'_>,
    ) -> Result<EncodedBlock, BlockError>;

    /// Decompress one code block.
    fn decode(
        &self,
        ctx: &mut Self::Context,
        job: &CodeBlockJob<'_>,
    ) -> Result<DecodedBlock, BlockError>;
}

/// A tile's shared rate-control state: the distortion accumulated over
/// all of its code blocks.
#[derive(Default)]
pub struct Tile {
    distortion: Mutex<f64>,
}

impl Tile {
    /// Create a tile with a zero distortion accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated distortion.
    pub fn distortion(&self) -> f64 {
        *self
            .distortion
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add_distortion(&self, amount: f64) {
        *self
            .distortion
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) += amount;
    }
}

/// Configuration for a [`T1Scheduler`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    /// The number of worker threads; 1 processes jobs on the caller
    /// thread in submission order.
    pub workers: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// The per-job results of a batch, in submission order, plus the
/// aggregate failure count.
pub struct BatchOutcome<T> {
    /// One result per submitted job.
    pub blocks: Vec<Result<T, BlockError>>,
    /// How many jobs failed.
    pub failures: usize,
}

impl<T> BatchOutcome<T> {
    /// Whether every job of the batch succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failures == 0
    }
}

/// Fans code-block jobs out to a pool of workers.
///
/// With more than one worker, jobs are claimed through a shared atomic
/// cursor, so cross-worker ordering is unspecified while the set of
/// work done stays identical. Each worker reuses its own coder context
/// across all blocks it claims; contexts are created up front and
/// dropped with the scheduler.
pub struct T1Scheduler<C: BlockCoder> {
    coder: C,
    contexts: Vec<C::Context>,
    pool: Option<rayon_core::ThreadPool>,
}

impl<C: BlockCoder> T1Scheduler<C> {
    /// Create a scheduler and its per-worker contexts.
    ///
    /// If the thread pool cannot be brought up, the scheduler falls
    /// back to sequential processing rather than failing.
    pub fn new(coder: C, options: SchedulerOptions) -> Self {
        let workers = usize::max(options.workers, 1);

        let pool = if workers > 1 {
            let built = rayon_core::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|index| format!("t1-worker-{index}"))
                .build();

            match built {
                Ok(pool) => Some(pool),
                Err(error) => {
                    warn!("failed to build T1 worker pool, going sequential: {error}");
                    None
                }
            }
        } else {
            None
        };

        let num_contexts = if pool.is_some() { workers } else { 1 };
        let contexts = (0..num_contexts).map(|_| coder.new_context()).collect();

        Self {
            coder,
            contexts,
            pool,
        }
    }

    /// The number of workers the scheduler runs with.
    pub fn workers(&self) -> usize {
        self.contexts.len()
    }

    /// Compress a batch of code blocks.
    ///
    /// When `rate_control` is set, each successfully encoded block's
    /// distortion is added to `tile`'s accumulator; otherwise the
    /// workers run fully independently.
    pub fn compress(
        &mut self,
        jobs: Vec<CodeBlockJob<'_>>,
        tile: &Tile,
        rate_control: bool,
    ) -> BatchOutcome<EncodedBlock> {
        let outcome = self.run(&jobs, |coder, ctx, job| {
            let block = coder.encode(ctx, job)?;
            if rate_control {
                tile.add_distortion(block.distortion);
            }
            Ok(block)
        });

        trace!(
            "compressed {} code blocks, {} failed",
            outcome.blocks.len(),
            outcome.failures,
        );

        outcome
    }

    /// Decompress a batch of code blocks.
    pub fn decompress(&mut self, jobs: Vec<CodeBlockJob<'_>>) -> BatchOutcome<DecodedBlock> {
        let outcome = self.run(&jobs, |coder, ctx, job| coder.decode(ctx, job));

        trace!(
            "decompressed {} code blocks, {} failed",
            outcome.blocks.len(),
            outcome.failures,
        );

        outcome
    }

    fn run<T, F>(&mut self, jobs: &[CodeBlockJob<'_>], process: F) -> BatchOutcome<T>
    where
        T: Send,
        F: Fn(&C, &mut C::Context, &CodeBlockJob<'_>) -> Result<T, BlockError> + Sync,
    {
        let mut results: Vec<Option<Result<T, BlockError>>> =
            (0..jobs.len()).map(|_| None).collect();

        let Self {
            coder,
            contexts,
            pool,
        } = self;
        let coder: &C = coder;

        match pool {
            None => {
                // Deterministic: submission order on the caller thread.
                let ctx = &mut contexts[0];
                for (slot, job) in results.iter_mut().zip(jobs) {
                    *slot = Some(process(coder, ctx, job));
                }
            }
            Some(pool) => {
                let cursor = AtomicUsize::new(0);
                let (sender, receiver) = flume::unbounded();
                let process = &process;
                let cursor = &cursor;

                pool.scope(|scope| {
                    for ctx in contexts.iter_mut() {
                        let sender = sender.clone();

                        scope.spawn(move |_| {
                            loop {
                                let index = cursor.fetch_add(1, Ordering::AcqRel);
                                if index >= jobs.len() {
                                    break;
                                }

                                let outcome = process(coder, ctx, &jobs[index]);
                                if sender.send((index, outcome)).is_err() {
                                    break;
                                }
                            }
                        });
                    }
                });

                drop(sender);
                for (index, outcome) in receiver.drain() {
                    results[index] = Some(outcome);
                }
            }
        }

        let mut failures = 0;
        let blocks = results
            .into_iter()
            .map(|result| {
                let result = result.expect("every job produces exactly one result");
                if result.is_err() {
                    failures += 1;
                }
                result
            })
            .collect();

        BatchOutcome { blocks, failures }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BlockCoder, CodeBlockJob, DecodedBlock, EncodedBlock, JobInput, SchedulerOptions,
        T1Scheduler, Tile,
    };
    use crate::component::SubBandType;
    use crate::error::BlockError;
    use crate::quant::StepSize;
    use crate::rect::IntRect;
    use smallvec::smallvec;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A stub coder that counts invocations and reports a fixed
    /// distortion; blocks whose bit-plane count is 0xFF fail.
    #[derive(Default)]
    struct StubCoder {
        calls: AtomicUsize,
        order: Mutex<Vec<u32>>,
    }

    impl BlockCoder for StubCoder {
        type Context = Vec<i32>;

        fn new_context(&self) -> Vec<i32> {
            Vec::new()
        }

        fn encode(
            &self,
            ctx: &mut Vec<i32>,
            job: &CodeBlockJob<'_>,
        ) -> Result<EncodedBlock, BlockError> {
            self.calls.fetch_add(1, Ordering::AcqRel);
            self.order
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(job.rect.x0);

            if job.num_bit_planes == 0xFF {
                return Err(BlockError::CorruptBlock);
            }

            // Exercise the per-worker scratch.
            ctx.clear();
            ctx.push(job.rect.x0 as i32);

            Ok(EncodedBlock {
                data: vec![job.rect.x0 as u8],
                passes: smallvec![],
                num_bit_planes: job.num_bit_planes,
                distortion: 1.0,
            })
        }

        fn decode(
            &self,
            _ctx: &mut Vec<i32>,
            job: &CodeBlockJob<'_>,
        ) -> Result<DecodedBlock, BlockError> {
            let JobInput::Stream(data) = job.input else {
                return Err(BlockError::CorruptBlock);
            };
            if data.is_empty() {
                return Err(BlockError::TruncatedStream);
            }

            Ok(DecodedBlock {
                samples: vec![data[0] as i32],
                num_passes: 1,
            })
        }
    }

    fn job(index: u32) -> CodeBlockJob<'static> {
        CodeBlockJob {
            rect: IntRect::from_xywh(index, 0, 4, 4),
            band: SubBandType::HighLow,
            level: 1,
            step: StepSize {
                mantissa: 0,
                exponent: 9,
            },
            num_bit_planes: 8,
            input: JobInput::Plane {
                samples: &[],
                stride: 0,
            },
        }
    }

    #[test]
    fn every_job_runs_exactly_once() {
        let mut scheduler = T1Scheduler::new(StubCoder::default(), SchedulerOptions { workers: 4 });
        let tile = Tile::new();

        let jobs: Vec<_> = (0..1000).map(job).collect();
        let outcome = scheduler.compress(jobs, &tile, true);

        assert_eq!(outcome.blocks.len(), 1000);
        assert!(outcome.all_succeeded());
        assert_eq!(scheduler.coder.calls.load(Ordering::Acquire), 1000);

        // Results line up with their jobs regardless of claim order.
        for (index, block) in outcome.blocks.iter().enumerate() {
            assert_eq!(block.as_ref().unwrap().data, [index as u8]);
        }

        // 1000 distortion contributions of 1.0 each.
        assert!((tile.distortion() - 1000.0).abs() < 0.01);
    }

    #[test]
    fn single_worker_runs_in_submission_order() {
        let mut scheduler = T1Scheduler::new(StubCoder::default(), SchedulerOptions { workers: 1 });
        let tile = Tile::new();

        let jobs: Vec<_> = (0..64).map(job).collect();
        let outcome = scheduler.compress(jobs, &tile, false);

        assert!(outcome.all_succeeded());
        let order = scheduler.coder.order.lock().unwrap();
        assert_eq!(*order, (0..64).collect::<Vec<_>>());

        // Without rate control the distortion is discarded.
        assert_eq!(tile.distortion(), 0.0);
    }

    #[test]
    fn failed_jobs_do_not_stop_the_batch() {
        let mut scheduler = T1Scheduler::new(StubCoder::default(), SchedulerOptions { workers: 3 });
        let tile = Tile::new();

        let jobs: Vec<_> = (0..100)
            .map(|i| {
                let mut job = job(i);
                if i % 10 == 0 {
                    job.num_bit_planes = 0xFF;
                }
                job
            })
            .collect();

        let outcome = scheduler.compress(jobs, &tile, true);
        assert_eq!(outcome.failures, 10);
        assert!(!outcome.all_succeeded());
        assert_eq!(scheduler.coder.calls.load(Ordering::Acquire), 100);

        for (index, block) in outcome.blocks.iter().enumerate() {
            assert_eq!(block.is_err(), index % 10 == 0);
        }

        // Failed blocks contribute no distortion.
        assert!((tile.distortion() - 90.0).abs() < 0.01);
    }

    #[test]
    fn decompress_round_trip() {
        let mut scheduler = T1Scheduler::new(StubCoder::default(), SchedulerOptions { workers: 2 });

        let streams: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i]).collect();
        let jobs: Vec<_> = streams
            .iter()
            .enumerate()
            .map(|(i, data)| {
                let mut job = job(i as u32);
                job.input = JobInput::Stream(data);
                job
            })
            .collect();

        let outcome = scheduler.decompress(jobs);
        assert!(outcome.all_succeeded());
        for (index, block) in outcome.blocks.iter().enumerate() {
            assert_eq!(block.as_ref().unwrap().samples, [index as i32]);
        }
    }
}
