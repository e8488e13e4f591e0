//! Async chunk generation with priority-based concurrent workers
//!
//! The map prepares a `BlockMakeData` for a chunk and hands it over here.
//! Generators run on blocking worker threads of a dedicated tokio runtime
//! and the filled job comes back through `poll_results`, ready for
//! `LogicMap::finish_block_make`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::core::types::{IVec2, IVec3, Result};

use super::{BlockMakeData, MapGenerator};

/// Builds a fresh generator for a worker
pub type GeneratorFactory = Arc<dyn Fn() -> Box<dyn MapGenerator> + Send + Sync>;

/// Request to generate one chunk
#[derive(Debug)]
pub struct EmergeRequest {
    pub data: BlockMakeData,
    /// Higher runs first
    pub priority: f32,
}

/// Result of a generation job
#[derive(Debug)]
pub enum EmergeResult {
    Generated(BlockMakeData),
    /// The worker panicked; the chunk stays ungenerated
    Failed(IVec3),
}

impl EmergeResult {
    /// First block of the chunk the job was for
    pub fn chunk(&self) -> IVec3 {
        match self {
            EmergeResult::Generated(data) => data.blockpos_min,
            EmergeResult::Failed(p) => *p,
        }
    }
}

/// Idle generators shared by the workers
#[derive(Clone)]
struct GeneratorPool {
    factory: GeneratorFactory,
    idle: Arc<Mutex<Vec<Box<dyn MapGenerator>>>>,
}

impl GeneratorPool {
    fn take(&self) -> Box<dyn MapGenerator> {
        let reused = match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };
        reused.unwrap_or_else(|| (self.factory)())
    }

    fn give_back(&self, generator: Box<dyn MapGenerator>) {
        match self.idle.lock() {
            Ok(mut idle) => idle.push(generator),
            Err(poisoned) => poisoned.into_inner().push(generator),
        }
    }

    fn run(&self, mut data: BlockMakeData) -> BlockMakeData {
        let mut generator = self.take();
        generator.make_chunk(&mut data);
        self.give_back(generator);
        data
    }
}

/// Concurrent chunk generator
pub struct EmergeManager {
    request_tx: mpsc::UnboundedSender<EmergeRequest>,
    result_rx: mpsc::UnboundedReceiver<EmergeResult>,
    /// Chunks currently queued or generating, by first block
    pending: HashSet<IVec3>,
    pool: GeneratorPool,
    #[allow(dead_code)]
    runtime: Runtime,
}

impl std::fmt::Debug for EmergeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergeManager").field("pending", &self.pending.len()).finish()
    }
}

impl EmergeManager {
    /// Start `num_workers` generation workers on a dedicated runtime
    pub fn new(factory: GeneratorFactory, num_workers: usize) -> Result<Self> {
        let num_workers = num_workers.max(1);
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<EmergeRequest>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<EmergeResult>();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(num_workers)
            .thread_name("emerge")
            .enable_all()
            .build()?;

        let pool = GeneratorPool { factory, idle: Arc::new(Mutex::new(Vec::new())) };
        let worker_pool = pool.clone();
        runtime.spawn(async move {
            Self::worker_loop(worker_pool, num_workers, &mut request_rx, result_tx).await;
        });
        log::info!("Emerge manager started with {} workers", num_workers);

        Ok(Self { request_tx, result_rx, pending: HashSet::new(), pool, runtime })
    }

    async fn worker_loop(
        pool: GeneratorPool,
        max_concurrent: usize,
        request_rx: &mut mpsc::UnboundedReceiver<EmergeRequest>,
        result_tx: mpsc::UnboundedSender<EmergeResult>,
    ) {
        use tokio::task::JoinSet;

        let mut active_tasks: JoinSet<(IVec3, Option<BlockMakeData>)> = JoinSet::new();
        let mut queued: Vec<EmergeRequest> = Vec::new();

        loop {
            tokio::select! {
                Some(request) = request_rx.recv() => {
                    queued.push(request);
                }

                Some(joined) = active_tasks.join_next(), if !active_tasks.is_empty() => {
                    let result = match joined {
                        Ok((_, Some(data))) => EmergeResult::Generated(data),
                        Ok((chunk, None)) => EmergeResult::Failed(chunk),
                        Err(e) => {
                            // The chunk id is lost with the task; callers time out on it
                            log::error!("Emerge task failed to join: {}", e);
                            continue;
                        }
                    };
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }

                else => {
                    if queued.is_empty() && active_tasks.is_empty() {
                        break;
                    }
                }
            }

            while active_tasks.len() < max_concurrent && !queued.is_empty() {
                queued.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
                let request = queued.remove(0);
                let chunk = request.data.blockpos_min;
                let pool = pool.clone();
                active_tasks.spawn_blocking(move || {
                    let data = request.data;
                    let run = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pool.run(data)));
                    match run {
                        Ok(data) => (chunk, Some(data)),
                        Err(_) => {
                            log::error!("Generator panicked on chunk {:?}", chunk);
                            (chunk, None)
                        }
                    }
                });
            }
        }
        log::debug!("Emerge worker loop finished");
    }

    /// Queue a chunk job.
    ///
    /// Returns `false` if the chunk is already pending or the workers are
    /// gone.
    pub fn request(&mut self, data: BlockMakeData, priority: f32) -> bool {
        let chunk = data.blockpos_min;
        if self.pending.contains(&chunk) {
            return false;
        }
        if self.request_tx.send(EmergeRequest { data, priority }).is_err() {
            log::error!("Emerge workers are gone, dropping chunk {:?}", chunk);
            return false;
        }
        self.pending.insert(chunk);
        true
    }

    /// Drain finished jobs without blocking
    pub fn poll_results(&mut self) -> Vec<EmergeResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            self.pending.remove(&result.chunk());
            results.push(result);
        }
        results
    }

    /// Block until the next job finishes. Returns `None` when nothing is
    /// pending. Must not be called from inside a tokio runtime.
    pub fn wait_result(&mut self) -> Option<EmergeResult> {
        if self.pending.is_empty() {
            return None;
        }
        let result = self.result_rx.blocking_recv()?;
        self.pending.remove(&result.chunk());
        Some(result)
    }

    /// Run a job on the calling thread
    pub fn generate_chunk_blocking(&self, data: BlockMakeData) -> BlockMakeData {
        self.pool.run(data)
    }

    /// Spawn height for column `p` as the generator sees it
    pub fn spawn_level_at_point(&self, p: IVec2) -> Option<i32> {
        let mut generator = self.pool.take();
        let level = generator.get_spawn_level_at_point(p);
        self.pool.give_back(generator);
        level
    }

    pub fn is_pending(&self, chunk: IVec3) -> bool {
        self.pending.contains(&chunk)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::WorldSettings;
    use crate::generation::MapgenSinglenode;
    use crate::voxel::area::VoxelArea;
    use crate::voxel::nodedef::NodeDefManager;

    fn job(defs: &Arc<NodeDefManager>, blockpos: IVec3) -> BlockMakeData {
        let mut data = BlockMakeData::new(defs.clone(), 1);
        data.blockpos_min = blockpos;
        data.blockpos_max = blockpos;
        let min = blockpos * 16;
        data.vmanip.add_area(&VoxelArea::new(min, min + IVec3::splat(15)));
        data
    }

    fn stone_factory() -> GeneratorFactory {
        Arc::new(|| Box::new(MapgenSinglenode::new(&WorldSettings::default(), "default:stone")) as Box<dyn MapGenerator>)
    }

    #[test]
    fn test_async_generation() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let stone = defs.get_id("default:stone").unwrap();
        let mut emerge = EmergeManager::new(stone_factory(), 2).unwrap();

        assert!(emerge.request(job(&defs, IVec3::ZERO), 1.0));
        assert!(!emerge.request(job(&defs, IVec3::ZERO), 1.0));
        assert!(emerge.request(job(&defs, IVec3::new(1, 0, 0)), 0.5));
        assert_eq!(emerge.pending_count(), 2);

        let mut done = Vec::new();
        while let Some(result) = emerge.wait_result() {
            match result {
                EmergeResult::Generated(data) => {
                    assert_eq!(data.vmanip.get_node_no_ex(data.node_min()).content(), stone);
                    done.push(data.blockpos_min);
                }
                EmergeResult::Failed(p) => panic!("chunk {p:?} failed"),
            }
        }
        done.sort_by_key(|p| p.x);
        assert_eq!(done, vec![IVec3::ZERO, IVec3::new(1, 0, 0)]);
        assert!(!emerge.is_pending(IVec3::ZERO));
        assert!(emerge.poll_results().is_empty());
    }

    #[test]
    fn test_blocking_generation_and_spawn() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let emerge = EmergeManager::new(stone_factory(), 1).unwrap();
        let data = emerge.generate_chunk_blocking(job(&defs, IVec3::new(0, -1, 0)));
        assert_eq!(
            data.vmanip.get_node_no_ex(IVec3::new(3, -3, 3)).content(),
            defs.get_id("default:stone").unwrap()
        );
        assert_eq!(emerge.spawn_level_at_point(IVec2::new(10, 10)), Some(0));
    }
}
