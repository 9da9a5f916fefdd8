//! In-memory automation double for unit tests

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::error::{E2eError, E2eResult};
use crate::protocol::{Automation, Command, ContextId};

/// Records every command and answers from scripted replies.
///
/// Lookup order per method: queued replies, then the sticky reply, then a
/// built-in default that mimics an empty page. Contexts and pages are
/// numbered from 1, each in their own sequence.
#[derive(Default)]
pub struct ScriptedAutomation {
    commands: Mutex<Vec<Command>>,
    queued: Mutex<HashMap<&'static str, VecDeque<Value>>>,
    sticky: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, String>>,
    panics: Mutex<HashMap<String, String>>,
    next_context: AtomicU64,
    next_page: AtomicU64,
}

impl ScriptedAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_with(&self, method: &str, value: Value) {
        self.sticky.lock().unwrap().insert(method.to_string(), value);
    }

    pub fn reply_sequence(&self, method: &'static str, values: Vec<Value>) {
        self.queued
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .extend(values);
    }

    pub fn fail_on(&self, method: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(method.to_string(), message.to_string());
    }

    pub fn panic_on(&self, method: &str, message: &str) {
        self.panics
            .lock()
            .unwrap()
            .insert(method.to_string(), message.to_string());
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count_of(&self, method: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method() == method)
            .count()
    }

    pub fn closed_contexts(&self) -> Vec<ContextId> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Command::CloseContext { context } => Some(*context),
                _ => None,
            })
            .collect()
    }

    fn default_reply(&self, command: &Command) -> Value {
        match command {
            Command::Launch { .. } => json!({ "version": "scripted" }),
            Command::NewContext { .. } => json!(self.next_context.fetch_add(1, Ordering::SeqCst) + 1),
            Command::NewPage { .. } => json!(self.next_page.fetch_add(1, Ordering::SeqCst) + 1),
            Command::CloseContext { .. } => json!(true),
            Command::Url { .. } => json!("about:blank"),
            Command::Count { .. } => json!(0),
            Command::IsVisible { .. } => json!(false),
            Command::Screenshot { .. } => json!(STANDARD.encode(tiny_png())),
            _ => Value::Null,
        }
    }
}

#[async_trait]
impl Automation for ScriptedAutomation {
    async fn execute(&self, command: Command) -> E2eResult<Value> {
        let method = command.method();
        self.commands.lock().unwrap().push(command.clone());

        let panic = self.panics.lock().unwrap().get(method).cloned();
        if let Some(message) = panic {
            panic!("{}", message);
        }
        if let Some(message) = self.failures.lock().unwrap().get(method) {
            return Err(E2eError::Driver(message.clone()));
        }
        if let Some(value) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return Ok(value);
        }
        if let Some(value) = self.sticky.lock().unwrap().get(method) {
            return Ok(value.clone());
        }
        Ok(self.default_reply(&command))
    }
}

/// A valid 4x3 PNG
pub fn tiny_png() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(4, 3, image::Rgba([226, 35, 26, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .unwrap();
    bytes
}
