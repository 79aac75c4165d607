mod parser;
mod search;

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::records::LoincCode;

/// Words the fake provider turns into vector dimensions.
const KEYWORDS: [&str; 5] = ["glucose", "cholesterol", "hemoglobin", "potassium", "sodium"];

/// A LOINC code with predictable text fields.
pub fn code(code: &str, analyte: &str) -> LoincCode {
    LoincCode {
        code: code.to_string(),
        display_name: format!("{analyte} [Mass/volume] in Blood"),
        long_common_name: format!("{analyte} [Mass/volume] in Blood"),
        short_name: format!("{analyte} Bld-mCnc"),
        component: analyte.to_string(),
        property: "MCnc".to_string(),
        time_aspect: "Pt".to_string(),
        system: "Bld".to_string(),
        scale_type: "Qn".to_string(),
        method_type: None,
        class_name: "CHEM".to_string(),
        version_last_changed: "2.73".to_string(),
    }
}

/// `count` codes named `T-0`, `T-1`, ...
pub fn numbered_codes(count: usize) -> Vec<LoincCode> {
    (0..count)
        .map(|i| code(&format!("T-{i}"), &format!("Analyte{i}")))
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Never,
    /// Fail only the n-th call (1-based).
    OnCall(usize),
    Always,
}

/// Deterministic provider: one dimension per keyword occurrence count, plus
/// one for text length. Counts calls so tests can check what was re-done.
pub struct FakeProvider {
    calls: AtomicUsize,
    texts: AtomicUsize,
    failure: Failure,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::with_failure(Failure::Never)
    }

    pub fn with_failure(failure: Failure) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            failure,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|kw| text.matches(kw).count() as f32)
            .collect();
        vector.push(text.len() as f32 / 100.0);
        vector
    }
}

impl EmbeddingProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = match self.failure {
            Failure::Never => false,
            Failure::OnCall(n) => n == call,
            Failure::Always => true,
        };
        if fail {
            return Err(EmbeddingError::EmbeddingFailed(format!("scripted failure on call {call}")));
        }

        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}
