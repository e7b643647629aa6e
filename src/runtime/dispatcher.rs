//! Message dispatch onto a fixed pool of worker tasks.
//!
//! Every request is routed to worker `conn_id % pool_size`, so all requests
//! from one connection are handled by the same worker in decode order.
//! Distinct connections on distinct workers proceed in parallel.
//!
//! ## Backpressure
//!
//! Each worker owns a bounded queue. When a slow handler fills it, the
//! connection reader submitting to that worker waits, which stops it from
//! reading the socket. Connections mapped to other workers are unaffected.
//!
//! ## Degenerate mode
//!
//! With `pool_size = 0` each request is handled on its own spawned task.
//! No ordering holds between requests of one connection in this mode.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::runtime::{Request, RouterTable};

/// Routes requests to workers and owns their queues.
pub struct Dispatcher {
    routes: Arc<RouterTable>,
    pool_size: u32,
    queue_capacity: usize,
    /// One sender per worker; empty until the pool starts and after shutdown.
    task_queues: RwLock<Vec<mpsc::Sender<Request>>>,
}

impl Dispatcher {
    /// Build a dispatcher over `routes`. Workers start with `start_worker_pool`.
    pub fn new(routes: RouterTable, config: &Config) -> Self {
        Self {
            routes: Arc::new(routes),
            pool_size: config.worker_pool_size,
            queue_capacity: config.worker_queue_capacity(),
            task_queues: RwLock::new(Vec::new()),
        }
    }

    /// The frozen routing table.
    pub fn routes(&self) -> &RouterTable {
        &self.routes
    }

    /// Configured number of workers; 0 means one task per request.
    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    /// Worker shard for a connection, `None` in per-request mode.
    pub fn worker_index(&self, conn_id: u32) -> Option<usize> {
        if self.pool_size == 0 {
            None
        } else {
            Some((conn_id % self.pool_size) as usize)
        }
    }

    /// Spawn one worker task per shard. Calling it again is a no-op.
    pub fn start_worker_pool(&self) {
        let mut task_queues = self.task_queues.write();
        if !task_queues.is_empty() {
            warn!("Worker pool already started");
            return;
        }

        for worker_id in 0..self.pool_size as usize {
            let (tx, rx) = mpsc::channel(self.queue_capacity);
            tokio::spawn(run_worker(worker_id, rx, Arc::clone(&self.routes)));
            task_queues.push(tx);
        }

        info!(
            workers = self.pool_size,
            queue_capacity = self.queue_capacity,
            "Worker pool started"
        );
    }

    /// Hand a request to its worker, waiting while that worker's queue is full.
    pub async fn send_msg_to_task_queue(&self, req: Request) -> Result<()> {
        let worker_id = self
            .worker_index(req.conn_id())
            .ok_or(Error::WorkerUnavailable(0))?;
        let queue = self
            .task_queues
            .read()
            .get(worker_id)
            .cloned()
            .ok_or(Error::WorkerUnavailable(worker_id))?;

        trace!(
            conn_id = req.conn_id(),
            msg_id = req.msg_id(),
            worker_id,
            "Request queued"
        );

        queue
            .send(req)
            .await
            .map_err(|_| Error::WorkerUnavailable(worker_id))
    }

    /// Dispatch according to the configured mode.
    pub async fn submit(&self, req: Request) -> Result<()> {
        if self.pool_size == 0 {
            let routes = Arc::clone(&self.routes);
            tokio::spawn(async move {
                routes.do_msg_handler(&req).await;
            });
            return Ok(());
        }
        self.send_msg_to_task_queue(req).await
    }

    /// Run the router chain for `req` on the calling task.
    pub async fn do_msg_handler(&self, req: &Request) {
        self.routes.do_msg_handler(req).await;
    }

    /// Close all worker queues. Workers finish what is already queued, then exit.
    pub fn shutdown(&self) {
        let closed = std::mem::take(&mut *self.task_queues.write());
        if !closed.is_empty() {
            info!(workers = closed.len(), "Worker pool shutting down");
        }
    }
}

/// Worker body: handle requests from one queue, strictly one at a time.
///
/// Each handler chain runs in a child task that the worker awaits, so a
/// panicking handler is logged and the worker keeps serving its shard.
async fn run_worker(
    worker_id: usize,
    mut queue: mpsc::Receiver<Request>,
    routes: Arc<RouterTable>,
) {
    debug!(worker_id, "Worker started");

    while let Some(req) = queue.recv().await {
        let conn_id = req.conn_id();
        let msg_id = req.msg_id();
        let routes = Arc::clone(&routes);

        let chain = tokio::spawn(async move {
            routes.do_msg_handler(&req).await;
        });

        if let Err(e) = chain.await {
            error!(worker_id, conn_id, msg_id, error = %e, "Handler failed");
        }
    }

    debug!(worker_id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use crate::runtime::testing::{accept_pair, test_context_with_routes, wait_until};
    use crate::runtime::Router;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    fn pool_config(pool_size: u32) -> Config {
        Config {
            worker_pool_size: pool_size,
            max_worker_queue_length: 4,
            ..Config::default()
        }
    }

    #[test]
    fn test_deterministic_sharding() {
        let dispatcher = Dispatcher::new(RouterTable::new(), &pool_config(10));
        assert_eq!(dispatcher.worker_index(23), Some(3));
        for conn_id in [3, 13, 23] {
            assert_eq!(dispatcher.worker_index(conn_id), Some(3));
        }
        assert_eq!(dispatcher.worker_index(10), Some(0));
    }

    #[test]
    fn test_no_sharding_without_pool() {
        let dispatcher = Dispatcher::new(RouterTable::new(), &pool_config(0));
        assert_eq!(dispatcher.worker_index(23), None);
    }

    /// Records (conn_id, sequence) in handling order.
    struct Recorder {
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    #[async_trait]
    impl Router for Recorder {
        async fn handle(&self, req: &Request) {
            let seq = u32::from_le_bytes(req.data()[..4].try_into().unwrap());
            // Uneven handler latency must not reorder a connection's requests.
            tokio::time::sleep(Duration::from_millis((seq % 3) as u64)).await;
            self.seen.lock().push((req.conn_id(), seq));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_per_connection_ordering() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut routes = RouterTable::new();
        routes
            .add_router(1, Arc::new(Recorder { seen: Arc::clone(&seen) }))
            .unwrap();

        let ctx = test_context_with_routes(pool_config(2), routes);
        ctx.dispatcher.start_worker_pool();

        let (a, _client_a) = accept_pair(&ctx, 4).await;
        let (b, _client_b) = accept_pair(&ctx, 5).await;

        for seq in 0..20u32 {
            for conn in [&a, &b] {
                let msg = Message::new(1, seq.to_le_bytes().to_vec());
                ctx.dispatcher
                    .submit(Request::new(Arc::clone(conn), msg))
                    .await
                    .unwrap();
            }
        }

        assert!(wait_until(|| seen.lock().len() == 40).await);

        let seen = seen.lock();
        for conn_id in [4, 5] {
            let order: Vec<u32> = seen
                .iter()
                .filter(|(id, _)| *id == conn_id)
                .map(|(_, seq)| *seq)
                .collect();
            assert_eq!(order, (0..20).collect::<Vec<_>>());
        }
    }

    struct Panicky;

    #[async_trait]
    impl Router for Panicky {
        async fn handle(&self, req: &Request) {
            if req.data().as_ref() == b"boom" {
                panic!("handler failure");
            }
        }
    }

    #[tokio::test]
    async fn test_worker_survives_handler_panic() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut routes = RouterTable::new();
        routes.add_router(1, Arc::new(Panicky)).unwrap();
        routes
            .add_router(2, Arc::new(Recorder { seen: Arc::clone(&seen) }))
            .unwrap();

        let ctx = test_context_with_routes(pool_config(1), routes);
        ctx.dispatcher.start_worker_pool();
        let (conn, _client) = accept_pair(&ctx, 0).await;

        ctx.dispatcher
            .submit(Request::new(Arc::clone(&conn), Message::new(1, &b"boom"[..])))
            .await
            .unwrap();
        ctx.dispatcher
            .submit(Request::new(
                Arc::clone(&conn),
                Message::new(2, 7u32.to_le_bytes().to_vec()),
            ))
            .await
            .unwrap();

        assert!(wait_until(|| seen.lock().as_slice() == [(0u32, 7u32)]).await);
    }

    /// Signals entry, then holds the worker until released.
    struct Gate {
        entered: Arc<AtomicBool>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Router for Gate {
        async fn handle(&self, _req: &Request) {
            self.entered.store(true, Ordering::SeqCst);
            self.release.notified().await;
        }
    }

    #[tokio::test]
    async fn test_full_worker_queue_blocks_submit() {
        let entered = Arc::new(AtomicBool::new(false));
        let release = Arc::new(Notify::new());
        let mut routes = RouterTable::new();
        routes
            .add_router(
                1,
                Arc::new(Gate {
                    entered: Arc::clone(&entered),
                    release: Arc::clone(&release),
                }),
            )
            .unwrap();

        let config = Config {
            worker_pool_size: 1,
            max_worker_queue_length: 1,
            ..Config::default()
        };
        let ctx = test_context_with_routes(config, routes);
        ctx.dispatcher.start_worker_pool();
        let (conn, _client) = accept_pair(&ctx, 0).await;
        let req = || Request::new(Arc::clone(&conn), Message::new(1, &b"x"[..]));

        // First request occupies the worker, second fills its queue.
        ctx.dispatcher.submit(req()).await.unwrap();
        assert!(wait_until(|| entered.load(Ordering::SeqCst)).await);
        ctx.dispatcher.submit(req()).await.unwrap();

        assert!(timeout(Duration::from_millis(200), ctx.dispatcher.submit(req()))
            .await
            .is_err());

        // Freeing the worker frees a queue slot.
        release.notify_one();
        timeout(Duration::from_secs(2), ctx.dispatcher.submit(req()))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_per_request_mode() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut routes = RouterTable::new();
        routes
            .add_router(1, Arc::new(Recorder { seen: Arc::clone(&seen) }))
            .unwrap();

        let ctx = test_context_with_routes(pool_config(0), routes);
        ctx.dispatcher.start_worker_pool();
        let (conn, _client) = accept_pair(&ctx, 9).await;

        for seq in 0..5u32 {
            let msg = Message::new(1, seq.to_le_bytes().to_vec());
            ctx.dispatcher
                .submit(Request::new(Arc::clone(&conn), msg))
                .await
                .unwrap();
        }

        assert!(wait_until(|| seen.lock().len() == 5).await);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let ctx = test_context_with_routes(pool_config(2), RouterTable::new());
        ctx.dispatcher.start_worker_pool();
        ctx.dispatcher.shutdown();

        let (conn, _client) = accept_pair(&ctx, 3).await;
        let err = ctx
            .dispatcher
            .submit(Request::new(conn, Message::new(1, &b"x"[..])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WorkerUnavailable(1)));
    }
}
