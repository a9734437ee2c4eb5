#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

mod device;
mod error;
mod loader;
mod traits;

pub mod blip;

pub use device::*;
pub use error::*;
pub use tokenizers;
pub use traits::*;

use tokio::sync::oneshot;

/// Messages understood by a model worker thread.
pub enum HandlerPayload<TItem, TOutput> {
    Process(TItem, oneshot::Sender<anyhow::Result<TOutput>>),
    Shutdown,
}
