//! Synchronous facade over the async chat and generation APIs.
//!
//! Every call here blocks the calling thread for the duration of one network
//! round trip. The work runs on a dedicated single-worker runtime owned by the
//! facade. Calls work from plain threads and from inside another async
//! runtime, where they park the calling worker.
//!
//! The wrapped value must not share a connection pool with async callers.
//! Hyper drives a pooled connection on the runtime that opened it; if that is
//! the runtime being parked, a blocking call reusing the connection never
//! completes. Give the facade its own provider, as
//! `TextGenInference::into_blocking` in the TGI backend does.

use futures::{Stream, StreamExt};
use once_cell::sync::OnceCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

use crate::{
    chat::{ChatGenerationChunk, ChatMessage, ChatModel, ChatResult},
    error::{GenerationFailure, LLMError},
    generation::{GenerationResult, TextGenProvider},
    params::GenerationParams,
};

/// Lazily started runtime that blocking calls are spawned on.
#[derive(Default)]
pub struct BlockingRuntime {
    runtime: OnceCell<Runtime>,
}

impl BlockingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn runtime(&self) -> Result<&Runtime, LLMError> {
        self.runtime.get_or_try_init(|| {
            Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("hfchat-blocking")
                .enable_all()
                .build()
                .map_err(|e| GenerationFailure::Runtime(e.to_string()).into())
        })
    }

    /// Runs `fut` to completion on the dedicated runtime and waits for it.
    pub fn run<F>(&self, fut: F) -> Result<F::Output, LLMError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = self.runtime()?.spawn(fut);
        futures::executor::block_on(handle)
            .map_err(|e| GenerationFailure::Runtime(e.to_string()).into())
    }
}

impl Drop for BlockingRuntime {
    // A runtime may not be dropped with a blocking shutdown from async code.
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Blocking wrapper around a shared async model or provider.
pub struct Blocking<T: ?Sized> {
    inner: Arc<T>,
    runtime: Arc<BlockingRuntime>,
}

impl<T: ?Sized> Clone for Blocking<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Blocking<T> {
    pub fn new(inner: Arc<T>) -> Self {
        Self {
            inner,
            runtime: Arc::new(BlockingRuntime::new()),
        }
    }

    pub fn inner(&self) -> &Arc<T> {
        &self.inner
    }
}

impl<T: TextGenProvider + ?Sized + 'static> Blocking<T> {
    /// Blocking counterpart of [`TextGenProvider::generate`].
    pub fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResult, LLMError> {
        let inner = self.inner.clone();
        let prompt = prompt.to_string();
        let params = params.clone();
        self.runtime
            .run(async move { inner.generate(&prompt, &params).await })?
    }

    /// Blocking counterpart of [`TextGenProvider::generate_stream`]. The
    /// request is sent before this returns; fragments are pulled one at a time.
    pub fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<BlockingStream<String>, LLMError> {
        let inner = self.inner.clone();
        let prompt = prompt.to_string();
        let params = params.clone();
        let stream = self
            .runtime
            .run(async move { inner.generate_stream(&prompt, &params).await })??;
        Ok(BlockingStream::new(stream, self.runtime.clone()))
    }
}

impl<T: ChatModel + ?Sized + 'static> Blocking<T> {
    /// Blocking counterpart of [`ChatModel::chat`].
    pub fn chat(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatResult, LLMError> {
        let inner = self.inner.clone();
        let messages = messages.to_vec();
        let stop = stop.map(<[String]>::to_vec);
        self.runtime
            .run(async move { inner.chat(&messages, stop.as_deref()).await })?
    }

    /// Blocking counterpart of [`ChatModel::chat_stream`].
    pub fn chat_stream(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<BlockingStream<ChatGenerationChunk>, LLMError> {
        let inner = self.inner.clone();
        let messages = messages.to_vec();
        let stop = stop.map(<[String]>::to_vec);
        let stream = self
            .runtime
            .run(async move { inner.chat_stream(&messages, stop.as_deref()).await })??;
        Ok(BlockingStream::new(stream, self.runtime.clone()))
    }
}

type BoxedStream<I> = Pin<Box<dyn Stream<Item = Result<I, LLMError>> + Send>>;

/// Pull-based iterator over a stream driven by the blocking runtime.
///
/// Dropping the iterator drops the stream and its connection.
pub struct BlockingStream<I> {
    stream: Option<BoxedStream<I>>,
    runtime: Arc<BlockingRuntime>,
}

impl<I: Send + 'static> BlockingStream<I> {
    fn new(stream: BoxedStream<I>, runtime: Arc<BlockingRuntime>) -> Self {
        Self {
            stream: Some(stream),
            runtime,
        }
    }
}

impl<I: Send + 'static> Iterator for BlockingStream<I> {
    type Item = Result<I, LLMError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut stream = self.stream.take()?;
        let polled = self.runtime.run(async move {
            let item = stream.next().await;
            (stream, item)
        });
        match polled {
            Ok((stream, Some(item))) => {
                self.stream = Some(stream);
                Some(item)
            }
            Ok((_, None)) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
