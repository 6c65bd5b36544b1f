//! Shared fixtures for the integration tests: a seeded in-memory lab and a
//! reasoning engine that replays a fixed script.

#![allow(dead_code)]

use chrono::NaiveDate;
use rigbook::api::engine::{EngineFuture, EngineReply, ReasoningEngine};
use rigbook::domain::{Capabilities, Resource, Subject};
use rigbook::error::EngineError;
use rigbook::ToolCall;
use rigbook::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

pub fn rig(id: i64, name: &str) -> Resource {
    Resource {
        id,
        name: name.into(),
        capabilities: Capabilities {
            weight_classes: vec!["<10K".into()],
            drive_types: vec!["AWD".into(), "FWD".into()],
            test_types: vec!["brake".into(), "emissions".into()],
        },
        enabled: true,
        available_from: None,
        available_to: None,
    }
}

pub fn vehicle(id: i64, code: &str, weight_lbs: i32, drive_type: &str) -> Subject {
    Subject {
        id,
        code: code.into(),
        weight_lbs,
        drive_type: drive_type.into(),
    }
}

/// One light AWD rig (`Rig-1`, id 1) and one 4,800 lb AWD vehicle (`V1`, id 1).
pub fn lab() -> MemoryStore {
    lab_with(MemoryStore::new())
}

pub fn lab_with(store: MemoryStore) -> MemoryStore {
    store.add_resource(rig(1, "Rig-1"));
    store.add_subject(vehicle(1, "V1", 4_800, "AWD"));
    store
}

/// Millisecond retry delays so failure paths run quickly.
pub fn fast_allocator() -> AllocatorConfig {
    AllocatorConfig::default().with_retry(
        RetryConfig::default().with_delays(Duration::from_millis(1), Duration::from_millis(2)),
    )
}

pub fn service(store: &MemoryStore) -> Arc<AllocationService> {
    Arc::new(AllocationService::new(
        Arc::new(store.clone()),
        fast_allocator(),
    ))
}

pub fn request(subject: &str, start: &str, days: u32) -> AllocationRequest {
    AllocationRequest {
        subject: SubjectRef::parse(subject),
        start: d(start),
        days,
        test_type: "brake".into(),
        backup: false,
        max_backup_days: None,
    }
}

// ── Scripted engine ─────────────────────────────────────────────────

/// Replays `invoke` replies in order, then answers "done". Summaries come
/// from a separate queue and fail once it is empty.
#[derive(Default)]
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<Result<EngineReply, EngineError>>>,
    summaries: Mutex<VecDeque<String>>,
    invocations: AtomicU32,
    completions: AtomicU32,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedEngine {
    pub fn new(replies: Vec<Result<EngineReply, EngineError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    pub fn with_summaries(self, summaries: Vec<String>) -> Self {
        *self.summaries.lock().unwrap() = summaries.into();
        self
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> u32 {
        self.completions.load(Ordering::SeqCst)
    }

    /// The prompt passed to each `invoke`, in order.
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }
}

impl ReasoningEngine for ScriptedEngine {
    fn invoke<'a>(&'a self, messages: &'a [Message], _: &'a [ToolDef]) -> EngineFuture<'a, EngineReply> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(EngineReply::Text("done".into())));
        Box::pin(async move { next })
    }

    fn complete<'a>(&'a self, _: &'a str, _: &'a str) -> EngineFuture<'a, String> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        let next = self.summaries.lock().unwrap().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| EngineError::Permanent("no summary scripted".into()))
        })
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> EngineReply {
    EngineReply::ToolCalls(vec![ToolCall::function(id, name, arguments)])
}

pub fn text(reply: &str) -> Result<EngineReply, EngineError> {
    Ok(EngineReply::Text(reply.into()))
}
