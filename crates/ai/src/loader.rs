use crate::Model;
use futures::Future;
use std::{pin::Pin, time::Instant};
use tracing::{debug, info};

type CreateModelFn<T> =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<T>>>> + Send>;

pub(crate) struct ModelLoader<T>
where
    T: Model,
{
    model_id: String,
    create_model_fn: CreateModelFn<T>,
}

impl<T> ModelLoader<T>
where
    T: Model,
{
    pub fn new<F, TFut>(model_id: &str, create_model: F) -> Self
    where
        F: FnOnce() -> TFut + Send + 'static,
        TFut: Future<Output = anyhow::Result<T>> + 'static,
    {
        Self {
            model_id: model_id.to_string(),
            create_model_fn: Box::new(move || Box::pin(create_model())),
        }
    }

    /// Runs the creation future to completion on `rt`. Takes `self` so a
    /// loader can produce at most one model.
    pub fn load(self, rt: &tokio::runtime::Runtime) -> anyhow::Result<T> {
        debug!("loading model {}", self.model_id);
        let start = Instant::now();

        let model = rt.block_on((self.create_model_fn)())?;

        info!("model {} loaded in {:?}", self.model_id, start.elapsed());
        Ok(model)
    }
}
