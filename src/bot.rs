//! Bot reply pipeline
//!
//! Every user message gets exactly one bot reply in its room. Keyword matches
//! produce canned replies; everything else is sent to the configured LLM
//! providers under a hard timeout and falls back to an apology.

use crate::broadcast::RoomBroadcaster;
use crate::llm::{GenerateRequest, LlmConfig, LlmManager};
use crate::protocol::ServerMessage;
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const GREETING_KEYWORDS: &[&str] = &["hello", "hi"];
const TIME_KEYWORDS: &[&str] = &["time"];
const JOKE_KEYWORDS: &[&str] = &["joke"];

pub const JOKE_REPLY: &str = "😂 Why don't programmers like nature? It has too many bugs!";
pub const APOLOGY_REPLY: &str = "⚠️ Sorry, I couldn't process that.";

/// What kind of reply a message gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Time,
    Joke,
    Generative,
}

/// Classify a message. First match wins; matching is a case-insensitive
/// substring test.
pub fn classify(text: &str) -> Intent {
    let text = text.trim().to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if contains_any(GREETING_KEYWORDS) {
        Intent::Greeting
    } else if contains_any(TIME_KEYWORDS) {
        Intent::Time
    } else if contains_any(JOKE_KEYWORDS) {
        Intent::Joke
    } else {
        Intent::Generative
    }
}

pub fn greeting_reply(name: &str) -> String {
    format!("Hi {}! 👋", name)
}

pub fn time_reply(now: DateTime<Local>) -> String {
    format!("⏱️ Current time: {}", now.format("%-I:%M:%S %p"))
}

/// Prompt sent to the LLM; the message is cut to `max_chars` characters
pub fn build_prompt(text: &str, max_chars: usize) -> String {
    let text: String = text.trim().chars().take(max_chars).collect();
    format!("Reply to this message in 1–2 short sentences: {}", text)
}

/// Source of "now" for time replies
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Fixed delay before any reply fires
    pub reply_delay: Duration,
    /// Hard upper bound on a generative call
    pub reply_timeout: Duration,
    pub prompt_max_chars: usize,
    pub max_tokens: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            reply_delay: Duration::from_millis(500),
            reply_timeout: Duration::from_secs(15),
            prompt_max_chars: 500,
            max_tokens: 150,
        }
    }
}

impl BotConfig {
    /// Load from environment; timeout and token limit come from the LLM config
    pub fn from_env(llm: &LlmConfig) -> Self {
        let defaults = Self::default();

        Self {
            reply_delay: std::env::var("BOT_REPLY_DELAY_MS")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.reply_delay),
            reply_timeout: llm.default_timeout,
            prompt_max_chars: std::env::var("BOT_PROMPT_MAX_CHARS")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.prompt_max_chars),
            max_tokens: llm.default_max_tokens,
        }
    }
}

/// A delivered bot reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotReply {
    pub intent: Intent,
    pub text: String,
    /// True when the generative branch fell back to the apology
    pub fallback: bool,
}

impl BotReply {
    fn canned(intent: Intent, text: impl Into<String>) -> Self {
        Self {
            intent,
            text: text.into(),
            fallback: false,
        }
    }

    fn apology() -> Self {
        Self {
            intent: Intent::Generative,
            text: APOLOGY_REPLY.to_string(),
            fallback: true,
        }
    }
}

#[derive(Clone)]
pub struct BotPipeline {
    broadcaster: Arc<RoomBroadcaster>,
    llm: Option<Arc<LlmManager>>,
    config: BotConfig,
    clock: Clock,
}

impl BotPipeline {
    pub fn new(
        broadcaster: Arc<RoomBroadcaster>,
        llm: Option<Arc<LlmManager>>,
        config: BotConfig,
    ) -> Self {
        Self {
            broadcaster,
            llm,
            config,
            clock: Arc::new(Local::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Schedule the reply to a message and return immediately.
    ///
    /// The reply goes to the room, so it is delivered even if the author's
    /// connection is gone by then. The handle may be dropped.
    pub fn spawn_reply(&self, room: String, author: String, text: String) -> JoinHandle<BotReply> {
        let pipeline = self.clone();
        let intent = classify(&text);
        tracing::debug!("Message from {} in {} classified as {:?}", author, room, intent);

        tokio::spawn(async move {
            tokio::time::sleep(pipeline.config.reply_delay).await;

            let reply = pipeline.resolve(intent, &author, &text).await;
            let delivered = pipeline
                .broadcaster
                .send_to_room(&room, ServerMessage::bot(reply.text.clone()))
                .await;
            tracing::debug!(
                "Bot reply ({:?}, fallback={}) delivered to {} connection(s) in {}",
                reply.intent,
                reply.fallback,
                delivered,
                room
            );
            reply
        })
    }

    async fn resolve(&self, intent: Intent, author: &str, text: &str) -> BotReply {
        match intent {
            Intent::Greeting => BotReply::canned(intent, greeting_reply(author)),
            // Read the clock now, after the delay, not when the message arrived
            Intent::Time => BotReply::canned(intent, time_reply((self.clock)())),
            Intent::Joke => BotReply::canned(intent, JOKE_REPLY),
            Intent::Generative => self.generate(text).await,
        }
    }

    async fn generate(&self, text: &str) -> BotReply {
        let Some(llm) = self.llm.clone() else {
            tracing::warn!("No LLM provider configured, sending apology");
            return BotReply::apology();
        };

        let request = GenerateRequest {
            prompt: build_prompt(text, self.config.prompt_max_chars),
            max_tokens: Some(self.config.max_tokens),
            timeout: self.config.reply_timeout,
        };

        // Run the call in its own task so a panicking provider still ends in
        // an apology instead of a lost reply
        let mut call = tokio::spawn(async move { llm.generate(request).await });

        match tokio::time::timeout(self.config.reply_timeout, &mut call).await {
            Ok(Ok(Ok(response))) => BotReply::canned(Intent::Generative, response.text),
            Ok(Ok(Err(e))) => {
                tracing::warn!("AI reply failed: {}", e);
                BotReply::apology()
            }
            Ok(Err(e)) => {
                tracing::warn!("AI reply task failed: {}", e);
                BotReply::apology()
            }
            Err(_) => {
                call.abort();
                tracing::warn!(
                    "AI reply timed out after {:?}",
                    self.config.reply_timeout
                );
                BotReply::apology()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerateResponse, LlmError, LlmProvider, LlmResult, ResponseMetadata};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
            Ok(GenerateResponse {
                text: format!("echo: {}", request.prompt),
                metadata: ResponseMetadata {
                    provider: "echo".to_string(),
                    model: "echo".to_string(),
                    tokens_used: None,
                    latency_ms: 0,
                },
            })
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn generate(&self, _request: GenerateRequest) -> LlmResult<GenerateResponse> {
            Err(LlmError::ApiError("service unavailable".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl LlmProvider for HangingProvider {
        async fn generate(&self, _request: GenerateRequest) -> LlmResult<GenerateResponse> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    struct PanickingProvider;

    #[async_trait]
    impl LlmProvider for PanickingProvider {
        async fn generate(&self, _request: GenerateRequest) -> LlmResult<GenerateResponse> {
            panic!("provider bug")
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    fn fast_config() -> BotConfig {
        BotConfig {
            reply_delay: Duration::from_millis(10),
            reply_timeout: Duration::from_millis(100),
            ..BotConfig::default()
        }
    }

    async fn pipeline_with(
        provider: Option<Box<dyn LlmProvider>>,
    ) -> (BotPipeline, mpsc::UnboundedReceiver<ServerMessage>) {
        let broadcaster = Arc::new(RoomBroadcaster::new());
        let (tx, rx) = mpsc::unbounded_channel();
        broadcaster.subscribe("room1", "c1", tx).await;

        let llm = provider.map(|p| Arc::new(LlmManager::new(vec![p])));
        (BotPipeline::new(broadcaster, llm, fast_config()), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_classify_greeting_any_case() {
        assert_eq!(classify("Hello there!"), Intent::Greeting);
        assert_eq!(classify("HELLO"), Intent::Greeting);
        assert_eq!(classify("hi"), Intent::Greeting);
    }

    #[test]
    fn test_classify_first_match_wins() {
        assert_eq!(classify("what time is it"), Intent::Time);
        assert_eq!(classify("tell me a JOKE"), Intent::Joke);
        // Greeting is checked before time
        assert_eq!(classify("hello, what time is it"), Intent::Greeting);
        // Time is checked before joke
        assert_eq!(classify("joke time"), Intent::Time);
        assert_eq!(classify("Explain recursion please"), Intent::Generative);
    }

    #[test]
    fn test_build_prompt_is_bounded() {
        let long = "a".repeat(1000);
        let prompt = build_prompt(&long, 10);
        assert!(prompt.ends_with(": aaaaaaaaaa"));
        assert_eq!(
            build_prompt("  how are you  ", 500),
            "Reply to this message in 1–2 short sentences: how are you"
        );
    }

    #[test]
    fn test_time_reply_format() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 15, 4, 5).unwrap();
        assert_eq!(time_reply(at), "⏱️ Current time: 3:04:05 PM");
    }

    #[tokio::test]
    async fn test_greeting_reply_is_delivered_to_room() {
        let (pipeline, mut rx) = pipeline_with(None).await;

        let reply = pipeline
            .spawn_reply("room1".into(), "alice".into(), "Hello there!".into())
            .await
            .unwrap();

        assert_eq!(reply.intent, Intent::Greeting);
        assert_eq!(drain(&mut rx), vec![ServerMessage::bot("Hi alice! 👋")]);
    }

    #[tokio::test]
    async fn test_joke_reply() {
        let (pipeline, mut rx) = pipeline_with(None).await;

        pipeline
            .spawn_reply("room1".into(), "alice".into(), "tell me a joke".into())
            .await
            .unwrap();

        assert_eq!(drain(&mut rx), vec![ServerMessage::bot(JOKE_REPLY)]);
    }

    #[tokio::test]
    async fn test_time_is_read_at_delivery() {
        let received_at = Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let delivered_at = Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 42).unwrap();
        let now = Arc::new(Mutex::new(received_at));

        let (pipeline, mut rx) = pipeline_with(None).await;
        let clock_now = now.clone();
        let pipeline = pipeline.with_clock(Arc::new(move || *clock_now.lock().unwrap()));

        let handle =
            pipeline.spawn_reply("room1".into(), "alice".into(), "what time is it".into());
        // The clock moves on before the delayed reply fires
        *now.lock().unwrap() = delivered_at;

        let reply = handle.await.unwrap();
        assert_eq!(reply.text, time_reply(delivered_at));
        assert!(reply.text.contains("9:00:42 AM"));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_generative_reply_uses_llm() {
        let (pipeline, mut rx) = pipeline_with(Some(Box::new(EchoProvider))).await;

        let reply = pipeline
            .spawn_reply("room1".into(), "alice".into(), "Explain recursion".into())
            .await
            .unwrap();

        assert!(!reply.fallback);
        assert_eq!(
            reply.text,
            "echo: Reply to this message in 1–2 short sentences: Explain recursion"
        );
        assert_eq!(drain(&mut rx), vec![ServerMessage::bot(reply.text)]);
    }

    #[tokio::test]
    async fn test_failing_llm_yields_single_apology() {
        let (pipeline, mut rx) = pipeline_with(Some(Box::new(FailingProvider))).await;

        let reply = pipeline
            .spawn_reply("room1".into(), "alice".into(), "Explain recursion".into())
            .await
            .unwrap();

        assert!(reply.fallback);
        assert_eq!(drain(&mut rx), vec![ServerMessage::bot(APOLOGY_REPLY)]);
    }

    #[tokio::test]
    async fn test_hanging_llm_times_out_to_apology() {
        let (pipeline, mut rx) = pipeline_with(Some(Box::new(HangingProvider))).await;

        let reply = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.spawn_reply("room1".into(), "alice".into(), "Explain recursion".into()),
        )
        .await
        .expect("reply must resolve within the bound")
        .unwrap();

        assert!(reply.fallback);
        assert_eq!(drain(&mut rx), vec![ServerMessage::bot(APOLOGY_REPLY)]);
    }

    #[tokio::test]
    async fn test_panicking_llm_yields_apology() {
        let (pipeline, mut rx) = pipeline_with(Some(Box::new(PanickingProvider))).await;

        let reply = pipeline
            .spawn_reply("room1".into(), "alice".into(), "Explain recursion".into())
            .await
            .unwrap();

        assert!(reply.fallback);
        assert_eq!(drain(&mut rx), vec![ServerMessage::bot(APOLOGY_REPLY)]);
    }

    #[tokio::test]
    async fn test_missing_llm_fails_closed() {
        let (pipeline, mut rx) = pipeline_with(None).await;
        assert!(!pipeline.has_llm());

        let reply = pipeline
            .spawn_reply("room1".into(), "alice".into(), "Explain recursion".into())
            .await
            .unwrap();

        assert!(reply.fallback);
        assert_eq!(drain(&mut rx), vec![ServerMessage::bot(APOLOGY_REPLY)]);
    }

    #[tokio::test]
    async fn test_reply_to_empty_room_does_not_fail() {
        let pipeline = BotPipeline::new(Arc::new(RoomBroadcaster::new()), None, fast_config());

        let reply = pipeline
            .spawn_reply("ghost-town".into(), "alice".into(), "hello".into())
            .await
            .unwrap();
        assert_eq!(reply.intent, Intent::Greeting);
    }
}
