//! Bounded FIFO of async decode pipelines with strictly in-order
//! completion. Up to `concurrency` tasks run at once, but their
//! results are handed to the consumer in enqueue order, so parallel
//! deserialisation never reorders blocks. A single failure clears the
//! queue and pauses it until `start_processing` is called again.

use crate::error::TranslatorError;
use futures::{future::BoxFuture, stream::FuturesOrdered, StreamExt};
use log::{debug, error};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::{mpsc, watch, Notify};

pub type QueueTask<T> = BoxFuture<'static, Result<T, TranslatorError>>;
pub type QueueHandler<T> =
    Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), TranslatorError>> + Send + Sync>;

enum Command<T> {
    Push(QueueTask<T>),
    Pause,
    Start,
    Clear,
}

pub struct OrderedQueue<T> {
    cmd: mpsc::UnboundedSender<Command<T>>,
    failure: watch::Receiver<Option<Arc<TranslatorError>>>,
    depth: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl<T: Send + 'static> OrderedQueue<T> {
    pub fn new(concurrency: usize, handler: QueueHandler<T>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = watch::channel(None);
        let depth = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());
        tokio::spawn(drive(
            concurrency.max(1),
            handler,
            cmd_rx,
            failure_tx,
            depth.clone(),
            drained.clone(),
        ));
        Self {
            cmd: cmd_tx,
            failure: failure_rx,
            depth,
            drained,
        }
    }

    /// Enqueue a task. Tasks run concurrently but complete in enqueue
    /// order.
    pub fn push(&self, task: QueueTask<T>) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        let _ = self.cmd.send(Command::Push(task));
    }

    pub fn pause(&self) {
        let _ = self.cmd.send(Command::Pause);
    }

    pub fn start_processing(&self) {
        let _ = self.cmd.send(Command::Start);
    }

    pub fn clear(&self) {
        let _ = self.cmd.send(Command::Clear);
    }

    /// Watch for the first fatal failure; `None` until one occurs and
    /// again after a restart.
    pub fn failure(&self) -> watch::Receiver<Option<Arc<TranslatorError>>> {
        self.failure.clone()
    }

    /// Number of tasks not yet fully processed (or cleared).
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued task has been processed or cleared.
    pub async fn drained(&self) {
        loop {
            if self.depth() == 0 {
                return;
            }
            let notified = self.drained.notified();
            if self.depth() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn drive<T: Send + 'static>(
    concurrency: usize,
    handler: QueueHandler<T>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command<T>>,
    failure_tx: watch::Sender<Option<Arc<TranslatorError>>>,
    depth: Arc<AtomicUsize>,
    drained: Arc<Notify>,
) {
    let mut running: FuturesOrdered<QueueTask<T>> = FuturesOrdered::new();
    let mut waiting: VecDeque<QueueTask<T>> = VecDeque::new();
    let mut paused = false;

    let settle = |n: usize| {
        if n > 0 && depth.fetch_sub(n, Ordering::SeqCst) == n {
            drained.notify_waiters();
        }
    };

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None => break,
                Some(Command::Push(task)) => {
                    if !paused && running.len() < concurrency {
                        running.push_back(task);
                    } else {
                        waiting.push_back(task);
                    }
                }
                Some(Command::Pause) => paused = true,
                Some(Command::Start) => {
                    debug!("ordered queue resuming");
                    paused = false;
                    let _ = failure_tx.send(None);
                    refill(concurrency, &mut running, &mut waiting);
                }
                Some(Command::Clear) => {
                    let dropped = running.len() + waiting.len();
                    running = FuturesOrdered::new();
                    waiting.clear();
                    settle(dropped);
                }
            },
            Some(result) = running.next(), if !paused && !running.is_empty() => {
                let outcome = match result {
                    Ok(item) => handler(item).await,
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(()) => {
                        refill(concurrency, &mut running, &mut waiting);
                        settle(1);
                    }
                    Err(e) => {
                        error!("ordered queue failure, clearing and pausing: {e}");
                        let dropped = 1 + running.len() + waiting.len();
                        running = FuturesOrdered::new();
                        waiting.clear();
                        paused = true;
                        let _ = failure_tx.send(Some(Arc::new(e)));
                        settle(dropped);
                    }
                }
            }
        }
    }
}

fn refill<T>(
    concurrency: usize,
    running: &mut FuturesOrdered<QueueTask<T>>,
    waiting: &mut VecDeque<QueueTask<T>>,
) {
    while running.len() < concurrency {
        match waiting.pop_front() {
            Some(task) => running.push_back(task),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    fn collector() -> (QueueHandler<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: QueueHandler<u32> = Arc::new(move |n| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(n);
                Ok(())
            })
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn completion_order_matches_enqueue_order() {
        let (handler, seen) = collector();
        let queue = OrderedQueue::new(4, handler);

        // Earlier tasks sleep longer, so parallel completion would
        // reverse them.
        for n in 0u32..8 {
            queue.push(Box::pin(async move {
                sleep(Duration::from_millis(u64::from(40 - n * 5))).await;
                Ok(n)
            }));
        }
        queue.drained().await;
        assert_eq!(*seen.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failure_clears_and_pauses_until_restart() {
        let (handler, seen) = collector();
        let queue = OrderedQueue::new(2, handler);
        let mut failure = queue.failure();

        queue.push(Box::pin(async {
            sleep(Duration::from_millis(10)).await;
            Ok(1)
        }));
        queue.push(Box::pin(async {
            sleep(Duration::from_millis(20)).await;
            Err(TranslatorError::Decode("boom".into()))
        }));
        queue.push(Box::pin(async { Ok(3) }));

        failure.changed().await.unwrap();
        assert!(failure.borrow().is_some());

        // Task 3 was cleared with the failure; a task pushed while
        // paused sits waiting.
        queue.push(Box::pin(async { Ok(4) }));
        sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        queue.start_processing();
        queue.drained().await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 4]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handler: QueueHandler<u32> = Arc::new(|_| Box::pin(async { Ok(()) }));
        let queue = OrderedQueue::new(3, handler);

        for _ in 0..12 {
            let live = live.clone();
            let peak = peak.clone();
            queue.push(Box::pin(async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                Ok(0)
            }));
        }
        queue.drained().await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
