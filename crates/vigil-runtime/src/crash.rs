//! Crash artifact arrival
//!
//! A crashing process leaves behind a dump plus a metadata file of
//! `key=value` lines. The harness never looks inside the dump; it waits for
//! the arrival notification and exposes the metadata as annotations.

use crate::error::{HarnessError, HarnessResult};
use crate::harness::{Harness, TestCase};
use crate::observer::{ObserverRegistry, Payload, RemotePublisher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::thread::JoinHandle;
use std::time::Duration;

/// Topic published when a crash artifact becomes available
pub const CRASH_TOPIC: &str = "crash-artifact-arrived";

/// A crash dump identifier with its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashArtifact {
    pub dump_id: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl CrashArtifact {
    pub fn new(dump_id: impl Into<String>) -> Self {
        Self {
            dump_id: dump_id.into(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Parse the `key=value` metadata format
    ///
    /// Blank lines are skipped and a value may itself contain `=`. A line
    /// without `=` or with an empty key rejects the whole artifact. Later
    /// duplicates of a key win.
    pub fn from_extra(dump_id: impl Into<String>, text: &str) -> HarnessResult<Self> {
        let mut artifact = Self::new(dump_id);
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(HarnessError::InvalidArtifact(format!(
                    "line {}: expected key=value, got {:?}",
                    index + 1,
                    line
                )));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(HarnessError::InvalidArtifact(format!(
                    "line {}: empty key",
                    index + 1
                )));
            }
            artifact
                .annotations
                .insert(key.to_string(), value.to_string());
        }
        Ok(artifact)
    }

    /// Render annotations back into the `key=value` format
    pub fn to_extra(&self) -> String {
        self.annotations
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect()
    }

    /// Decode an arrival payload
    ///
    /// Accepts `{"dump_id", "extra": "k=v\n.."}` or the serialized form
    /// `{"dump_id", "annotations": {..}}`. Non-string annotation values are
    /// kept in their JSON rendering.
    pub fn from_payload(payload: &Payload) -> HarnessResult<Self> {
        let object = payload.as_object().ok_or_else(|| {
            HarnessError::InvalidArtifact(format!("expected an object, got {}", payload))
        })?;
        let dump_id = object
            .get("dump_id")
            .and_then(Payload::as_str)
            .ok_or_else(|| HarnessError::InvalidArtifact("missing string 'dump_id'".to_string()))?;

        if let Some(extra) = object.get("extra") {
            let text = extra.as_str().ok_or_else(|| {
                HarnessError::InvalidArtifact("'extra' must be a string".to_string())
            })?;
            return Self::from_extra(dump_id, text);
        }

        if let Ok(artifact) = Self::deserialize(payload) {
            return Ok(artifact);
        }

        let mut artifact = Self::new(dump_id);
        match object.get("annotations") {
            None | Some(Payload::Null) => {}
            Some(Payload::Object(map)) => {
                for (key, value) in map {
                    let value = match value {
                        Payload::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    artifact.annotations.insert(key.clone(), value);
                }
            }
            Some(other) => {
                return Err(HarnessError::InvalidArtifact(format!(
                    "'annotations' must be an object, got {}",
                    other
                )))
            }
        }
        Ok(artifact)
    }

    pub fn to_payload(&self) -> Payload {
        serde_json::json!(self)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.contains_key(key)
    }

    /// Fail unless annotation `key` is present with value `expected`
    pub fn expect_annotation(&self, key: &str, expected: &str) -> HarnessResult<()> {
        match self.annotation(key) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(HarnessError::AssertionFailed(format!(
                "crash annotation '{}' expected {:?}, got {:?}",
                key, expected, actual
            ))),
            None => Err(HarnessError::AssertionFailed(format!(
                "crash annotation '{}' is missing from dump {}",
                key, self.dump_id
            ))),
        }
    }
}

/// Announce an artifact on the loop's thread
pub fn publish_crash(registry: &ObserverRegistry, artifact: &CrashArtifact) {
    tracing::info!(dump_id = %artifact.dump_id, "crash artifact arrived");
    registry.publish(CRASH_TOPIC, artifact.to_payload());
}

/// Deliver an artifact from another thread after `delay`
///
/// Stands in for a crashing child process: the loop keeps waiting in real
/// time until the artifact has been handed over. The handle yields whether
/// delivery succeeded.
pub fn deliver_from_thread(
    remote: &RemotePublisher,
    artifact: CrashArtifact,
    delay: Duration,
) -> JoinHandle<bool> {
    let work = remote.expect_delivery();
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        work.publish(CRASH_TOPIC, artifact.to_payload())
    })
}

/// Wait for the next crash artifact and decode it
pub fn await_crash(
    harness: &Harness,
    test: &TestCase,
    timeout: Duration,
) -> impl Future<Output = HarnessResult<CrashArtifact>> + 'static {
    let arrival = harness.await_topic(test, CRASH_TOPIC, timeout);
    async move {
        let payload = arrival.await?;
        CrashArtifact::from_payload(&payload)
    }
}
