//! Deterministic stand-in for the hosted classifier, used by tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{ClassScores, SentimentModel};

const NEGATIVE_WORDS: &[&str] = &["awful", "terrible", "broke", "waste", "bad", "worst"];

enum Script {
    Fixed(ClassScores),
    Keywords,
    Fail(String),
}

pub struct ScriptedModel {
    script: Script,
    calls: AtomicUsize,
    last_input: Mutex<Option<String>>,
}

impl ScriptedModel {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(None),
        }
    }

    pub fn fixed(positive: f64, negative: f64) -> Self {
        Self::with_script(Script::Fixed(ClassScores { positive, negative }))
    }

    /// Negative when the text contains a known complaint word.
    pub fn keywords() -> Self {
        Self::with_script(Script::Keywords)
    }

    pub fn failing(message: &str) -> Self {
        Self::with_script(Script::Fail(message.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<String> {
        self.last_input.lock().unwrap().clone()
    }
}

#[async_trait]
impl SentimentModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify(&self, text: &str) -> Result<ClassScores> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = Some(text.to_string());

        match &self.script {
            Script::Fixed(scores) => Ok(*scores),
            Script::Keywords => {
                let lowered = text.to_lowercase();
                if NEGATIVE_WORDS.iter().any(|word| lowered.contains(word)) {
                    Ok(ClassScores {
                        positive: 0.08,
                        negative: 0.92,
                    })
                } else {
                    Ok(ClassScores {
                        positive: 0.87,
                        negative: 0.13,
                    })
                }
            }
            Script::Fail(message) => Err(anyhow!("{message}")),
        }
    }
}
