//! FixedCaptioner - テスト用の Captioner
//!
//! 返答は固定、呼び出しはすべて記録。失敗モードも設定できます。

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::ports::{CaptionError, CaptionRequest, Captioner};

enum Behavior {
    Reply(String),
    Fail,
    Empty,
}

pub struct FixedCaptioner {
    behavior: Behavior,
    multimedia: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<CaptionRequest>>,
}

impl FixedCaptioner {
    pub fn new(response: &str) -> Self {
        Self {
            behavior: Behavior::Reply(response.to_string()),
            multimedia: true,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A backend that always fails.
    pub fn failing() -> Self {
        Self {
            behavior: Behavior::Fail,
            multimedia: true,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A backend that returns an empty description.
    pub fn empty() -> Self {
        Self {
            behavior: Behavior::Empty,
            multimedia: true,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn without_multimedia(mut self) -> Self {
        self.multimedia = false;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CaptionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Captioner for FixedCaptioner {
    async fn describe(&self, request: CaptionRequest) -> Result<String, CaptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Fail => Err(CaptionError::Backend("synthetic failure".to_string())),
            Behavior::Empty => Err(CaptionError::Empty),
        }
    }

    fn supports_multimedia(&self) -> bool {
        self.multimedia
    }
}
