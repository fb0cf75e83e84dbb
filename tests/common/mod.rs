//! Shared test utilities
//!
//! Fakes for every collaborator so the pipeline runs without audio hardware,
//! network access or a model server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Notify, mpsc};

use interject::config::{Config, PipelineConfig};
use interject::pipeline::Turn;
use interject::voice::{
    AudioFrame, AudioSource, ChunkStream, CommandCapture, LanguageModel, SpeechEngine, Utterance,
    WakeClassifier,
};
use interject::{Error, Result};

/// Frame length the fake classifier expects
pub const FRAME_LENGTH: usize = 4;

/// Pipeline timings small enough for tests
#[must_use]
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.pipeline = PipelineConfig {
        settle_interval: Duration::from_millis(20),
        settle_timeout: Duration::from_millis(500),
        queue_poll_interval: Duration::from_millis(10),
        preempt_timeout: Duration::from_millis(500),
        capture_timeout: Duration::from_millis(100),
        phrase_limit: Duration::from_millis(100),
        greeting: String::new(),
        ..PipelineConfig::default()
    };
    config
}

/// Poll `done` every 5ms until it holds, panicking after `limit`
pub async fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !done() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// What happened to one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spoken {
    Finished(String),
    Stopped(String),
}

/// Speech engine that takes `delay` per utterance and can be cut off
#[derive(Default)]
pub struct FakeSpeech {
    delay: Duration,
    log: Mutex<Vec<Spoken>>,
    current: Mutex<Option<String>>,
    stop: Notify,
    failures: Mutex<usize>,
}

impl FakeSpeech {
    #[must_use]
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Every utterance that played to the end, in order
    #[must_use]
    pub fn finished(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Spoken::Finished(text) => Some(text.clone()),
                Spoken::Stopped(_) => None,
            })
            .collect()
    }

    /// Every utterance that was started, in order
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        let mut started: Vec<String> = self
            .log
            .lock()
            .unwrap()
            .iter()
            .map(|s| match s {
                Spoken::Finished(text) | Spoken::Stopped(text) => text.clone(),
            })
            .collect();
        started.extend(self.current());
        started
    }

    #[must_use]
    pub fn log(&self) -> Vec<Spoken> {
        self.log.lock().unwrap().clone()
    }

    /// Text currently being spoken
    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }

    /// Make the next `count` calls to `speak` fail
    pub fn fail(&self, count: usize) {
        *self.failures.lock().unwrap() = count;
    }
}

#[async_trait]
impl SpeechEngine for FakeSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::Tts("speaker unplugged".to_string()));
            }
        }

        let stopped = self.stop.notified();
        *self.current.lock().unwrap() = Some(text.to_string());

        let entry = tokio::select! {
            () = tokio::time::sleep(self.delay) => Spoken::Finished(text.to_string()),
            () = stopped => Spoken::Stopped(text.to_string()),
        };

        *self.current.lock().unwrap() = None;
        self.log.lock().unwrap().push(entry);
        Ok(())
    }

    fn stop(&self) {
        self.stop.notify_waiters();
    }
}

/// One scripted capture result
#[derive(Debug, Clone)]
pub enum Heard {
    Command(String),
    /// Command heard only after a delay
    After(Duration, String),
    Nothing,
    Failure,
    /// Never returns; exercises the capture bound
    Hang,
}

/// Command capture that replays a script, then hears nothing
#[derive(Default)]
pub struct FakeCapture {
    script: Mutex<VecDeque<Heard>>,
    calls: Mutex<usize>,
}

impl FakeCapture {
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = Heard>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(0),
        })
    }

    #[must_use]
    pub fn commands(commands: &[&str]) -> Arc<Self> {
        Self::new(commands.iter().map(|c| Heard::Command((*c).to_string())))
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl CommandCapture for FakeCapture {
    async fn capture(
        &self,
        _timeout: Duration,
        _phrase_limit: Duration,
    ) -> Result<Option<Utterance>> {
        *self.calls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();

        match next.unwrap_or(Heard::Nothing) {
            Heard::Command(text) => Ok(Utterance::new(text)),
            Heard::After(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(Utterance::new(text))
            }
            Heard::Nothing => Ok(None),
            Heard::Failure => Err(Error::Stt("transcription service unavailable".to_string())),
            Heard::Hang => std::future::pending().await,
        }
    }
}

/// One step of a scripted model response
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(String),
    Fail(String),
}

/// A scripted response
#[derive(Debug, Clone)]
pub enum Reply {
    Stream(Vec<Step>),
    /// The request itself fails
    Refuse(String),
}

impl Reply {
    #[must_use]
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::Stream(chunks.iter().map(|c| Step::Chunk((*c).to_string())).collect())
    }
}

/// Language model that replays scripted replies with a per-chunk delay
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    delay: Duration,
    requests: Mutex<Vec<(Vec<Turn>, String)>>,
}

impl ScriptedModel {
    #[must_use]
    pub fn new(delay: Duration, replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            delay,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// History and input of every request, in order
    #[must_use]
    pub fn requests(&self) -> Vec<(Vec<Turn>, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream(&self, history: &[Turn], input: &str) -> Result<ChunkStream> {
        self.requests
            .lock()
            .unwrap()
            .push((history.to_vec(), input.to_string()));

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::chunks(&["I have nothing more to say."]));

        let steps = match reply {
            Reply::Refuse(reason) => return Err(Error::Model(reason)),
            Reply::Stream(steps) => steps,
        };

        let delay = self.delay;
        Ok(futures::stream::iter(steps)
            .then(move |step| async move {
                tokio::time::sleep(delay).await;
                match step {
                    Step::Chunk(text) => Ok(text),
                    Step::Fail(reason) => Err(Error::Model(reason)),
                }
            })
            .boxed())
    }
}

/// Fires on frames whose first sample is non-zero
pub struct FakeClassifier;

impl WakeClassifier for FakeClassifier {
    fn frame_length(&self) -> usize {
        FRAME_LENGTH
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn classify(&mut self, frame: &AudioFrame) -> Option<usize> {
        (frame.samples()[0] != 0).then_some(0)
    }
}

/// Audio source whose frames are injected through a [`Microphone`] handle
pub struct FakeAudio {
    sender: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    broken: bool,
}

/// Test-side handle for a [`FakeAudio`]
#[derive(Clone)]
pub struct Microphone {
    sender: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

impl FakeAudio {
    #[must_use]
    pub fn new() -> (Box<Self>, Microphone) {
        let sender = Arc::new(Mutex::new(None));
        let mic = Microphone {
            sender: Arc::clone(&sender),
        };
        (
            Box::new(Self {
                sender,
                broken: false,
            }),
            mic,
        )
    }

    /// A source whose device cannot be opened
    #[must_use]
    pub fn broken() -> Box<Self> {
        Box::new(Self {
            sender: Arc::new(Mutex::new(None)),
            broken: true,
        })
    }
}

impl AudioSource for FakeAudio {
    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.broken {
            return Err(Error::Audio("no input device available".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.sender.lock().unwrap().take();
    }
}

impl Microphone {
    /// Deliver a frame the fake classifier accepts
    pub fn say_wake_word(&self) {
        self.send(vec![1; FRAME_LENGTH]);
    }

    /// Deliver a frame the fake classifier rejects
    pub fn background_noise(&self) {
        self.send(vec![0; FRAME_LENGTH]);
    }

    fn send(&self, samples: Vec<i16>) {
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            tx.try_send(AudioFrame::new(samples))
                .expect("frame channel full or closed");
        }
    }

    /// Whether the source is currently delivering frames
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }
}
