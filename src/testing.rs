use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::fetch::SourceReader;
use crate::error::{Result, UpdaterError};
use crate::models::{ParsedSettings, Source};
use crate::storage::SettingsStore;
use crate::ui::{Notice, Status, Ui};

/// 内存中的设置存储，可对指定 key 注入写入失败
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<ParsedSettings>,
    fail_on: Mutex<HashSet<String>>,
    pub writes: AtomicUsize,
}

impl MemorySettings {
    pub fn with(initial: Value) -> Self {
        let store = Self::default();
        if let Value::Object(map) = initial {
            *store.values.lock().unwrap() = map;
        }
        store
    }

    /// 之后对该 key 的写入都会失败
    pub fn fail_writes_to(&self, key: &str) {
        self.fail_on.lock().unwrap().insert(key.to_string());
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: Option<Value>) -> Result<()> {
        if self.fail_on.lock().unwrap().contains(key) {
            return Err(UpdaterError::WriteFailure(format!("{key}: injected failure")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut values = self.values.lock().unwrap();
        match value {
            Some(v) => {
                values.insert(key.to_string(), v);
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }
}

/// 记录状态变化和通知；confirm 返回预设答案
#[derive(Default)]
pub struct RecordingUi {
    pub statuses: Mutex<Vec<Status>>,
    pub notices: Mutex<Vec<Notice>>,
    pub prompts: Mutex<Vec<String>>,
    pub answer: bool,
}

impl RecordingUi {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            ..Default::default()
        }
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ui for RecordingUi {
    fn set_status(&self, status: Status) {
        self.statuses.lock().unwrap().push(status);
    }

    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }

    async fn confirm(&self, message: &str) -> bool {
        self.prompts.lock().unwrap().push(message.to_string());
        self.answer
    }
}

/// 对所有来源返回同一段内容（或同一个错误）
pub struct StaticReader {
    content: Mutex<std::result::Result<String, String>>,
    pub reads: AtomicUsize,
}

impl StaticReader {
    pub fn new(content: &str) -> Self {
        Self {
            content: Mutex::new(Ok(content.to_string())),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            content: Mutex::new(Err(message.to_string())),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn set_content(&self, content: &str) {
        *self.content.lock().unwrap() = Ok(content.to_string());
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceReader for StaticReader {
    fn can_handle(&self, source: &Source) -> bool {
        source.url.is_some() || source.file.is_some()
    }

    async fn read(&self, _source: &Source) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.content
            .lock()
            .unwrap()
            .clone()
            .map_err(UpdaterError::FetchError)
    }
}
