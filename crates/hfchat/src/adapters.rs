use crate::{
    chat::{ChatGeneration, ChatGenerationChunk, ChatMessage, ChatModel, ChatResult, ChatStream},
    error::{GenerationFailure, LLMError},
    format::PromptFormatter,
    generation::{
        GenerationResult, TextGenProvider, TextStream,
        http::{HTTPTextGenProvider, StreamEvent},
    },
    outbound::{ByteStream, Outbound},
    params::GenerationParams,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Drives an [`HTTPTextGenProvider`] over an [`Outbound`] transport.
#[derive(Clone)]
pub struct TextGenFromHTTP {
    inner: Arc<dyn HTTPTextGenProvider>,
    outbound: Outbound,
}

impl TextGenFromHTTP {
    pub fn new(inner: Arc<dyn HTTPTextGenProvider>, outbound: Outbound) -> Self {
        Self { inner, outbound }
    }
}

#[async_trait]
impl TextGenProvider for TextGenFromHTTP {
    #[instrument(name = "http_adapter.generate", skip_all)]
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResult, LLMError> {
        let req = self.inner.generate_request(prompt, params, false)?;
        log::debug!("POST {} ({} bytes)", req.uri(), req.body().len());
        let resp = self.outbound.call(req).await?;
        self.inner.parse_generate(resp)
    }

    #[instrument(name = "http_adapter.generate_stream", skip_all)]
    async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TextStream, LLMError> {
        let req = self.inner.generate_request(prompt, params, true)?;
        log::debug!("POST {} ({} bytes, streaming)", req.uri(), req.body().len());
        let body = self.outbound.call_stream(req).await?;
        Ok(fragment_stream(self.inner.clone(), body))
    }
}

/// State carried between polls of a fragment stream.
struct LineReader {
    inner: Arc<dyn HTTPTextGenProvider>,
    body: ByteStream,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, LLMError>>,
    finished: bool,
}

impl LineReader {
    /// Parses every complete line in the buffer. Stops at the first line that
    /// ends the stream, successfully or not.
    fn drain_lines(&mut self) {
        let mut start = 0;
        for i in 0..self.buffer.len() {
            if self.finished {
                break;
            }
            if self.buffer[i] == b'\n' {
                let line = self.buffer[start..i + 1].to_vec();
                self.handle_line(&line);
                start = i + 1;
            }
        }
        self.buffer.drain(..start);
    }

    fn handle_line(&mut self, line: &[u8]) {
        match self.inner.parse_stream_line(line) {
            Ok(StreamEvent::Fragment(text)) => self.pending.push_back(Ok(text)),
            Ok(StreamEvent::Done { fragment, details }) => {
                if let Some(text) = fragment {
                    self.pending.push_back(Ok(text));
                }
                log::debug!("Stream done: {:?}", details.as_ref().and_then(|d| d.get("finish_reason")));
                self.finished = true;
            }
            Ok(StreamEvent::Skip) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// Splits a response body into lines and maps each through the provider,
/// yielding text fragments until the provider reports completion. A body that
/// ends without completion yields [`GenerationFailure::Incomplete`].
fn fragment_stream(inner: Arc<dyn HTTPTextGenProvider>, body: ByteStream) -> TextStream {
    let reader = LineReader {
        inner,
        body,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(item) = reader.pending.pop_front() {
                return Some((item, reader));
            }
            if reader.finished {
                return None;
            }
            match reader.body.next().await {
                Some(Ok(bytes)) => {
                    log::trace!("Received chunk: {} bytes", bytes.len());
                    reader.buffer.extend_from_slice(&bytes);
                    reader.drain_lines();
                }
                Some(Err(e)) => {
                    reader.finished = true;
                    reader.pending.push_back(Err(e));
                }
                None => {
                    if !reader.buffer.is_empty() {
                        reader.buffer.push(b'\n');
                        reader.drain_lines();
                    }
                    if !reader.finished {
                        reader.finished = true;
                        reader
                            .pending
                            .push_back(Err(GenerationFailure::Incomplete.into()));
                    }
                }
            }
        }
    }))
}

/// A chat model built from a prompt format and a text-generation endpoint.
pub struct TextGenChat<F: PromptFormatter> {
    llm: Arc<dyn TextGenProvider>,
    formatter: F,
    params: GenerationParams,
    llm_type: String,
}

impl<F: PromptFormatter> TextGenChat<F> {
    pub fn new(
        llm: Arc<dyn TextGenProvider>,
        formatter: F,
        params: GenerationParams,
        llm_type: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            formatter,
            params,
            llm_type: llm_type.into(),
        }
    }

    pub fn formatter(&self) -> &F {
        &self.formatter
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// The prompt that `messages` turn into.
    pub fn prompt(&self, messages: &[ChatMessage]) -> String {
        self.formatter.format(messages)
    }

    /// Configured parameters with the stop list for this call appended. The
    /// formatter's defaults stand in when the caller passes no stop list or
    /// an empty one.
    fn call_params(&self, stop: Option<&[String]>) -> GenerationParams {
        let stop = match stop {
            Some(stop) if !stop.is_empty() => stop.to_vec(),
            _ => self.formatter.default_stop(),
        };
        self.params.invocation_params(Some(&stop), &Map::new())
    }

    fn chat_result(result: GenerationResult) -> ChatResult {
        ChatResult {
            generations: vec![ChatGeneration {
                message: ChatMessage::assistant(result.generated_text),
                generation_info: result.details,
            }],
        }
    }
}

impl<F: PromptFormatter + fmt::Debug> fmt::Debug for TextGenChat<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextGenChat")
            .field("llm_type", &self.llm_type)
            .field("formatter", &self.formatter)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F: PromptFormatter> ChatModel for TextGenChat<F> {
    fn llm_type(&self) -> &str {
        &self.llm_type
    }

    fn identifying_params(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            "model_kwargs".into(),
            self.params.to_json().unwrap_or_default(),
        );
        map
    }

    #[instrument(name = "chat_model.chat", skip_all, fields(llm_type = %self.llm_type))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatResult, LLMError> {
        let prompt = self.prompt(messages);
        let params = self.call_params(stop);
        let result = self.llm.generate(&prompt, &params).await?;
        Ok(Self::chat_result(result))
    }

    #[instrument(name = "chat_model.chat_stream", skip_all, fields(llm_type = %self.llm_type))]
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        stop: Option<&[String]>,
    ) -> Result<ChatStream, LLMError> {
        let prompt = self.prompt(messages);
        let params = self.call_params(stop);
        let stream = self.llm.generate_stream(&prompt, &params).await?;
        Ok(Box::pin(stream.map(|res| {
            res.map(|content| ChatGenerationChunk { content })
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Llama2Formatter;
    use bytes::Bytes;
    use http::{Method, Request, Response};
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Minimal line protocol: `+text` is a fragment, `.` ends, `!msg` fails.
    struct LineProvider {
        base: String,
    }

    impl HTTPTextGenProvider for LineProvider {
        fn generate_request(
            &self,
            prompt: &str,
            params: &GenerationParams,
            stream: bool,
        ) -> Result<Request<Vec<u8>>, LLMError> {
            let body = serde_json::json!({"prompt": prompt, "params": params, "stream": stream});
            Ok(Request::builder()
                .method(Method::POST)
                .uri(format!("{}/gen", self.base))
                .body(serde_json::to_vec(&body)?)?)
        }

        fn parse_generate(&self, resp: Response<Vec<u8>>) -> Result<GenerationResult, LLMError> {
            crate::handle_http_error!(resp);
            Ok(serde_json::from_slice(resp.body())?)
        }

        fn parse_stream_line(&self, line: &[u8]) -> Result<StreamEvent, LLMError> {
            let line = String::from_utf8_lossy(line);
            let line = line.trim_end();
            if let Some(text) = line.strip_prefix('+') {
                Ok(StreamEvent::Fragment(text.to_string()))
            } else if line == "." {
                Ok(StreamEvent::Done {
                    fragment: None,
                    details: None,
                })
            } else if let Some(msg) = line.strip_prefix('!') {
                Err(GenerationFailure::Remote {
                    error_type: "test".into(),
                    message: msg.into(),
                }
                .into())
            } else {
                Ok(StreamEvent::Skip)
            }
        }
    }

    fn adapter(base: &str) -> TextGenFromHTTP {
        TextGenFromHTTP::new(
            Arc::new(LineProvider {
                base: base.to_string(),
            }),
            Outbound::new(Duration::from_secs(10)).unwrap(),
        )
    }

    fn byte_stream(parts: &[&'static str]) -> ByteStream {
        let items: Vec<Result<Bytes, LLMError>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        Box::pin(futures::stream::iter(items))
    }

    async fn collect(stream: TextStream) -> Vec<Result<String, LLMError>> {
        stream.collect().await
    }

    fn provider() -> Arc<dyn HTTPTextGenProvider> {
        Arc::new(LineProvider {
            base: String::new(),
        })
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_reassembled() {
        let body = byte_stream(&["+Hel", "\n\n+l", "o\n", ".\n+ignored\n"]);
        let out: Vec<String> = collect(fragment_stream(provider(), body))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(out, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn final_line_without_newline_is_parsed() {
        let body = byte_stream(&["+a\n", "."]);
        let out = collect(fragment_stream(provider(), body)).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), "a");
    }

    #[tokio::test]
    async fn body_ending_early_is_an_error() {
        let body = byte_stream(&["+a\n"]);
        let out = collect(fragment_stream(provider(), body)).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(
            out[1],
            Err(LLMError::GenerationFailure(GenerationFailure::Incomplete))
        ));
    }

    #[tokio::test]
    async fn error_line_surfaces_in_place() {
        let body = byte_stream(&["+a\n!overloaded\n+b\n"]);
        let out = collect(fragment_stream(provider(), body)).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "a");
        match &out[1] {
            Err(LLMError::GenerationFailure(GenerationFailure::Remote { message, .. })) => {
                assert_eq!(message, "overloaded")
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn generate_round_trips_through_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gen"))
            .and(body_partial_json(serde_json::json!({"prompt": "p", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "generated_text": "out",
                "details": {"finish_reason": "eos_token"}
            })))
            .mount(&server)
            .await;

        let result = adapter(&server.uri())
            .generate("p", &GenerationParams::new())
            .await
            .unwrap();
        assert_eq!(result.generated_text, "out");
        assert_eq!(result.finish_reason(), Some("eos_token"));
    }

    #[tokio::test]
    async fn generate_surfaces_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(serde_json::json!({"error": "busy"})),
            )
            .mount(&server)
            .await;

        let err = adapter(&server.uri())
            .generate("p", &GenerationParams::new())
            .await
            .unwrap_err();
        match err {
            LLMError::GenerationFailure(GenerationFailure::Status { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw("+Hel\n+lo\n.\n", "text/plain"))
            .mount(&server)
            .await;

        let stream = adapter(&server.uri())
            .generate_stream("p", &GenerationParams::new())
            .await
            .unwrap();
        let out: Vec<String> = collect(stream).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(out, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn transport_failure_is_generation_failure() {
        // Nothing listens on port 9 (discard) in the test environment.
        let err = adapter("http://127.0.0.1:9")
            .generate("p", &GenerationParams::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LLMError::GenerationFailure(GenerationFailure::Http(_))
        ));
    }

    /// Records what the chat model asks for and answers with a fixed result.
    struct Recorder {
        seen: Mutex<Vec<(String, GenerationParams)>>,
    }

    #[async_trait]
    impl TextGenProvider for Recorder {
        async fn generate(
            &self,
            prompt: &str,
            params: &GenerationParams,
        ) -> Result<GenerationResult, LLMError> {
            self.seen
                .lock()
                .unwrap()
                .push((prompt.to_string(), params.clone()));
            let mut details = Map::new();
            details.insert("generated_tokens".into(), 1.into());
            Ok(GenerationResult {
                generated_text: " Hi!".into(),
                details: Some(details),
            })
        }

        async fn generate_stream(
            &self,
            prompt: &str,
            params: &GenerationParams,
        ) -> Result<TextStream, LLMError> {
            self.seen
                .lock()
                .unwrap()
                .push((prompt.to_string(), params.clone()));
            let parts = vec![Ok("Hel".to_string()), Ok("lo".to_string())];
            Ok(Box::pin(futures::stream::iter(parts)))
        }
    }

    fn chat_model(recorder: Arc<Recorder>) -> TextGenChat<Llama2Formatter> {
        TextGenChat::new(
            recorder,
            Llama2Formatter::new(),
            GenerationParams::new().max_new_tokens(8).stop_sequence("User:"),
            "huggingface-llama2",
        )
    }

    #[tokio::test]
    async fn chat_formats_prompt_and_wraps_result() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let model = chat_model(recorder.clone());
        let result = model
            .chat(&[ChatMessage::system("s"), ChatMessage::human("h")], None)
            .await
            .unwrap();

        assert_eq!(result.text(), Some(" Hi!"));
        assert_eq!(
            result.generations[0].message,
            ChatMessage::assistant(" Hi!")
        );
        assert_eq!(
            result.generations[0].generation_info.as_ref().unwrap()["generated_tokens"],
            1
        );

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].0, "<s><<SYS>>\ns\n<</SYS>>\n\n</s>\n<s>[INST]h[/INST]");
        assert_eq!(seen[0].1.stop_sequences, vec!["User:", "</s>"]);
        assert_eq!(seen[0].1.max_new_tokens, Some(8));
    }

    #[tokio::test]
    async fn runtime_stop_replaces_formatter_default() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let model = chat_model(recorder.clone());
        let stop = vec!["###".to_string()];
        model
            .chat(&[ChatMessage::human("h")], Some(&stop))
            .await
            .unwrap();
        assert_eq!(
            recorder.seen.lock().unwrap()[0].1.stop_sequences,
            vec!["User:", "###"]
        );
    }

    #[tokio::test]
    async fn chat_stream_yields_chunks() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let model = chat_model(recorder);
        let chunks: Vec<String> = model
            .chat_stream(&[ChatMessage::human("h")], None)
            .await
            .unwrap()
            .map(|c| c.unwrap().content)
            .collect()
            .await;
        assert_eq!(chunks, vec!["Hel", "lo"]);
        assert_eq!(model.llm_type(), "huggingface-llama2");
        assert_eq!(
            model.identifying_params()["model_kwargs"],
            serde_json::json!({"max_new_tokens": 8, "stop": ["User:"]})
        );
    }

    #[tokio::test]
    async fn empty_stop_list_falls_back_to_default() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let model = chat_model(recorder.clone());
        model
            .chat(&[ChatMessage::human("h")], Some(&[]))
            .await
            .unwrap();
        assert_eq!(
            recorder.seen.lock().unwrap()[0].1.stop_sequences,
            vec!["User:", "</s>"]
        );
    }

    #[test]
    fn chat_model_debug_skips_provider() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let shown = format!("{:?}", chat_model(recorder));
        assert!(shown.starts_with("TextGenChat {"));
        assert!(shown.contains("llm_type: \"huggingface-llama2\""));
        assert!(shown.ends_with(", .. }"));
    }
}
