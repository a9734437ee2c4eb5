mod image_caption;

use crate::{loader, HandlerPayload};
use anyhow::anyhow;
use futures::Future;
pub use image_caption::*;
use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
};
use tokio::sync::{mpsc, oneshot};

pub trait Model {
    type Item;
    type Output;

    /// One blocking inference call. Runs on the model's worker thread.
    fn process(&mut self, item: Self::Item) -> anyhow::Result<Self::Output>;
}

pub type HandlerTx<Item, Output> = mpsc::Sender<HandlerPayload<Item, Output>>;

/// Cloneable handle to a model owned by a dedicated worker thread.
///
/// The model is created on that thread and never leaves it, so it does not
/// need to be `Send`. Requests are handled one at a time in arrival order.
#[derive(Debug)]
pub struct AIModel<TItem, TOutput> {
    model_id: String, // for better logging
    tx: HandlerTx<TItem, TOutput>,
    loaded: Arc<AtomicBool>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<TItem, TOutput> Clone for AIModel<TItem, TOutput> {
    fn clone(&self) -> Self {
        Self {
            model_id: self.model_id.clone(),
            tx: self.tx.clone(),
            loaded: self.loaded.clone(),
            worker: self.worker.clone(),
        }
    }
}

impl<TItem, TOutput> AIModel<TItem, TOutput>
where
    TItem: Send + 'static,
    TOutput: Send + 'static,
{
    /// Spawns the worker thread and waits until `create_model` finished on it.
    /// A failed load is returned here and the worker exits.
    pub async fn new<T, TFut, TFn>(
        model_id: impl Into<String>,
        create_model: TFn,
        queue_capacity: usize,
    ) -> anyhow::Result<Self>
    where
        T: Model<Item = TItem, Output = TOutput> + 'static,
        TFut: Future<Output = anyhow::Result<T>> + 'static,
        TFn: FnOnce() -> TFut + Send + 'static,
    {
        let model_id = model_id.into();
        let loader = loader::ModelLoader::new(&model_id, create_model);
        let (tx, mut rx) = mpsc::channel::<HandlerPayload<TItem, TOutput>>(queue_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<()>>();
        let loaded = Arc::new(AtomicBool::new(false));

        let worker = {
            let loaded = loaded.clone();
            let model_id = model_id.clone();

            std::thread::Builder::new()
                .name(format!("model-{}", model_id))
                .spawn(move || {
                    let rt = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.into()));
                            return;
                        }
                    };

                    let mut model = match loader.load(&rt) {
                        Ok(model) => model,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    drop(rt);

                    loaded.store(true, Ordering::SeqCst);
                    if ready_tx.send(Ok(())).is_err() {
                        tracing::warn!("nobody is waiting for model {}", model_id);
                    }

                    while let Some(payload) = rx.blocking_recv() {
                        match payload {
                            HandlerPayload::Process(item, result_tx) => {
                                // If channel closed,
                                // we have no way to response, just ignore task.
                                if result_tx.is_closed() {
                                    tracing::debug!("result receiver dropped, skip item");
                                    continue;
                                }

                                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                                    model.process(item)
                                }))
                                .unwrap_or_else(|_| Err(anyhow!("model panicked during inference")));

                                if result_tx.send(result).is_err() {
                                    tracing::error!("failed to send result");
                                }
                            }
                            HandlerPayload::Shutdown => {
                                tracing::info!("shutdown requested for model {}", model_id);
                                break;
                            }
                        }
                    }

                    loaded.store(false, Ordering::SeqCst);
                    drop(model);
                    tracing::info!("model {} offloaded", model_id);
                })?
        };

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.context(format!("failed to load model {}", model_id))),
            Err(_) => anyhow::bail!("worker of model {} exited during load", model_id),
        }

        Ok(Self {
            model_id,
            tx,
            loaded,
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// True while the worker holds a loaded model.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    #[tracing::instrument(name = "AIModel::process_single", err(Debug), skip_all, fields(model_id=%self.model_id))]
    pub async fn process_single(&self, item: TItem) -> anyhow::Result<TOutput> {
        let (result_tx, rx) = oneshot::channel();

        if let Err(e) = self.tx.send(HandlerPayload::Process(item, result_tx)).await {
            anyhow::bail!("failed to send item: {}", e);
        }
        tracing::debug!("item sent to model");

        match rx.await {
            Ok(result) => result,
            Err(e) => anyhow::bail!("failed to receive result: {}", e),
        }
    }

    /// Lets the worker finish queued items, then drops the model and joins
    /// the thread. Later calls through any clone of this handle fail.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        // send fails only if the worker is already gone
        let _ = self.tx.send(HandlerPayload::Shutdown).await;

        let worker = self
            .worker
            .lock()
            .map_err(|_| anyhow!("worker handle poisoned"))?
            .take();

        if let Some(worker) = worker {
            tokio::task::spawn_blocking(move || worker.join())
                .await?
                .map_err(|_| anyhow!("worker of model {} panicked", self.model_id))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    impl Model for Echo {
        type Item = String;
        type Output = String;

        fn process(&mut self, item: String) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match item.as_str() {
                "fail" => anyhow::bail!("cannot echo"),
                "panic" => panic!("echo panicked"),
                _ => Ok(item.to_uppercase()),
            }
        }
    }

    async fn echo_model(calls: Arc<AtomicUsize>, loads: Arc<AtomicUsize>) -> AIModel<String, String> {
        AIModel::new(
            "echo",
            move || async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Echo { calls })
            },
            4,
        )
        .await
        .expect("create echo model")
    }

    #[test_log::test(tokio::test)]
    async fn test_process_single() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loads = Arc::new(AtomicUsize::new(0));
        let model = echo_model(calls.clone(), loads.clone()).await;

        assert!(model.is_loaded());
        assert_eq!(model.model_id(), "echo");
        assert_eq!(model.process_single("hello".into()).await.unwrap(), "HELLO");

        let cloned = model.clone();
        assert_eq!(cloned.process_single("world".into()).await.unwrap(), "WORLD");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_concurrent_requests_get_their_own_results() {
        let model = echo_model(Arc::default(), Arc::default()).await;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let model = model.clone();
                tokio::spawn(async move { (i, model.process_single(format!("item-{}", i)).await) })
            })
            .collect();

        for handle in handles {
            let (i, result) = handle.await.unwrap();
            assert_eq!(result.unwrap(), format!("ITEM-{}", i));
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_errors_do_not_stop_worker() {
        let model = echo_model(Arc::default(), Arc::default()).await;

        let err = model.process_single("fail".into()).await.unwrap_err();
        assert!(err.to_string().contains("cannot echo"));

        let err = model.process_single("panic".into()).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));

        assert_eq!(model.process_single("ok".into()).await.unwrap(), "OK");
        assert!(model.is_loaded());
    }

    #[test_log::test(tokio::test)]
    async fn test_load_failure_is_returned() {
        let result = AIModel::<String, String>::new(
            "broken",
            || async { Err::<Echo, _>(anyhow!("weights not found")) },
            4,
        )
        .await;

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("weights not found"));
        assert!(err.to_string().contains("broken"));
    }

    #[test_log::test(tokio::test)]
    async fn test_shutdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = echo_model(calls.clone(), Arc::default()).await;
        let cloned = model.clone();

        model.shutdown().await.unwrap();

        assert!(!model.is_loaded());
        assert!(cloned.process_single("late".into()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // second shutdown is a no-op
        cloned.shutdown().await.unwrap();
    }

    /// Takes a while per item and records the order it saw them in.
    struct Slow {
        seen: Arc<Mutex<Vec<usize>>>,
    }

    impl Model for Slow {
        type Item = usize;
        type Output = usize;

        fn process(&mut self, item: usize) -> anyhow::Result<usize> {
            std::thread::sleep(std::time::Duration::from_millis(20));
            self.seen
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .push(item);
            Ok(item * 10)
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_shutdown_drains_queue_in_order() {
        let seen = Arc::new(Mutex::new(vec![]));
        let model = {
            let seen = seen.clone();
            AIModel::new("slow", move || async move { Ok(Slow { seen }) }, 8)
                .await
                .unwrap()
        };

        // the first poll queues 0..5, shutdown is sent after them
        let mut pending = Box::pin(futures::future::join_all(
            (0..5).map(|i| model.process_single(i)),
        ));
        assert!(futures::poll!(&mut pending).is_pending());
        let (results, shutdown) = futures::join!(pending, model.shutdown());

        shutdown.unwrap();
        let results: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(results, vec![0, 10, 20, 30, 40]);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(!model.is_loaded());
    }
}
