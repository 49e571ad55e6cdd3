//! Recording collaborators for tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::dispatch::{Completion, OutputUnavailable};

use super::{Collaborators, Notifier, SpeechEngine, SpeechOutput, TabController, TabDirection, TabInfo};

#[derive(Debug, Default)]
pub struct RecordingEngine {
    unsupported: bool,
    unreachable: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    audio_blocks: AtomicUsize,
}

impl RecordingEngine {
    pub fn unsupported() -> Self {
        Self {
            unsupported: true,
            ..Self::default()
        }
    }

    /// Make later start requests fail to reach the engine
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Start requests attempted, delivered or not
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn audio_blocks(&self) -> usize {
        self.audio_blocks.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.starts() + self.stops() + self.audio_blocks()
    }
}

impl SpeechEngine for RecordingEngine {
    fn is_supported(&self) -> bool {
        !self.unsupported
    }

    fn start(&self) -> bool {
        self.starts.fetch_add(1, Ordering::SeqCst);
        !self.unreachable.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn accept_audio(&self, _block: &[f32]) {
        self.audio_blocks.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabCall {
    Create(String),
    CloseActive,
    Cycle(TabDirection),
}

#[derive(Debug, Default)]
pub struct RecordingTabs {
    calls: Mutex<Vec<TabCall>>,
}

impl RecordingTabs {
    pub fn calls(&self) -> Vec<TabCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl TabController for RecordingTabs {
    fn create_tab(&self, url: &str) {
        self.calls.lock().unwrap().push(TabCall::Create(url.to_string()));
    }

    fn close_active_tab(&self) {
        self.calls.lock().unwrap().push(TabCall::CloseActive);
    }

    fn cycle_tab(&self, direction: TabDirection) {
        self.calls.lock().unwrap().push(TabCall::Cycle(direction));
    }

    fn query_active_tab(&self) -> Option<TabInfo> {
        None
    }
}

/// How [`RecordingOutput`] treats completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Fire the completion as soon as speech is requested
    #[default]
    Immediate,
    /// Keep completions until the test releases them
    Hold,
    /// Refuse every request
    Unavailable,
}

#[derive(Debug, Default)]
pub struct RecordingOutput {
    mode: OutputMode,
    spoken: Mutex<Vec<String>>,
    held: Mutex<Vec<Completion>>,
}

impl RecordingOutput {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    /// Release the oldest held completion
    pub fn finish_next(&self) {
        let completion = self.held.lock().unwrap().remove(0);
        completion.complete();
    }

    pub fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }
}

impl SpeechOutput for RecordingOutput {
    fn speak(&self, text: &str, on_complete: Completion) -> Result<(), OutputUnavailable> {
        if self.mode == OutputMode::Unavailable {
            return Err(OutputUnavailable(on_complete));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        match self.mode {
            OutputMode::Hold => self.held.lock().unwrap().push(on_complete),
            _ => on_complete.complete(),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn display(&self, title: &str, message: &str) {
        self.shown
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}

/// A full set of recording collaborators
pub struct Recorders {
    pub engine: Arc<RecordingEngine>,
    pub output: Arc<RecordingOutput>,
    pub tabs: Arc<RecordingTabs>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Recorders {
    pub fn new(engine: RecordingEngine, mode: OutputMode) -> Self {
        Self {
            engine: Arc::new(engine),
            output: Arc::new(RecordingOutput::new(mode)),
            tabs: Arc::new(RecordingTabs::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            engine: self.engine.clone(),
            output: Some(self.output.clone()),
            tabs: self.tabs.clone(),
            notifier: self.notifier.clone(),
        }
    }
}
