//! Classifier backends that score an analysis on a class-index scale.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::io::config::{ClassifierBackend, ClassifierConfig};

/// Class index for an analysis ending in a positive report.
pub const POSITIVE_CLASS: usize = 4;
/// Class index for a negative report or no report at all.
pub const NEGATIVE_CLASS: usize = 0;

static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)FINAL\s+REPORT[\s*_:\-]*(POSITIVE|NEGATIVE)").unwrap()
});

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Maps text to a class index; higher means more positive.
pub trait Classifier {
    fn class_index(&self, text: &str) -> Result<usize>;
}

/// Build the backend selected in config.
pub fn from_config(cfg: &ClassifierConfig) -> Result<Box<dyn Classifier>> {
    match cfg.backend {
        ClassifierBackend::VerdictMarker => Ok(Box::new(VerdictMarkerClassifier)),
        ClassifierBackend::Http => {
            let url = cfg
                .url
                .clone()
                .ok_or_else(|| anyhow!("classifier.url is required for the http backend"))?;
            Ok(Box::new(HttpClassifier::new(
                url,
                Duration::from_secs(cfg.timeout_secs),
            )?))
        }
    }
}

/// Reads the `FINAL REPORT: POSITIVE|NEGATIVE` line the analyzer is asked to end with.
///
/// The last report wins. An analysis consisting of the bare word `POSITIVE`
/// also counts; anything else scores [`NEGATIVE_CLASS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VerdictMarkerClassifier;

impl Classifier for VerdictMarkerClassifier {
    fn class_index(&self, text: &str) -> Result<usize> {
        let marker = VERDICT_RE
            .captures_iter(text)
            .last()
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_ascii_uppercase());

        let positive = match marker.as_deref() {
            Some("POSITIVE") => true,
            Some(_) => false,
            None => {
                let bare = text
                    .trim()
                    .trim_end_matches(|c: char| c.is_ascii_punctuation())
                    .to_ascii_uppercase();
                bare == "POSITIVE"
            }
        };
        Ok(if positive {
            POSITIVE_CLASS
        } else {
            NEGATIVE_CLASS
        })
    }
}

/// Posts the text to a text-classification endpoint and maps the best label to an index.
///
/// Accepts the common response shapes `[{label, score}]`, `[[{label, score}]]`
/// and `{label, score}`.
pub struct HttpClassifier {
    http: reqwest::blocking::Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    inputs: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassifyResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
    Single(LabelScore),
}

impl ClassifyResponse {
    fn into_scores(self) -> Vec<LabelScore> {
        match self {
            ClassifyResponse::Nested(rows) => rows.into_iter().flatten().collect(),
            ClassifyResponse::Flat(scores) => scores,
            ClassifyResponse::Single(score) => vec![score],
        }
    }
}

impl HttpClassifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build classifier http client")?;
        Ok(Self { http, url })
    }
}

impl Classifier for HttpClassifier {
    #[instrument(skip_all, fields(url = %self.url))]
    fn class_index(&self, text: &str) -> Result<usize> {
        let response = self
            .http
            .post(&self.url)
            .json(&ClassifyRequest { inputs: text })
            .send()
            .context("send classify request")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("classifier returned {status}: {}", body.trim()));
        }
        let parsed: ClassifyResponse = response.json().context("parse classify response")?;
        let index = best_label_index(&parsed.into_scores())?;
        debug!(index, "classified");
        Ok(index)
    }
}

/// Index of the highest-scoring label.
pub fn best_label_index(scores: &[LabelScore]) -> Result<usize> {
    let best = scores
        .iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .ok_or_else(|| anyhow!("classifier returned no labels"))?;
    label_index(&best.label).ok_or_else(|| anyhow!("unrecognized classifier label '{}'", best.label))
}

/// Map a label such as `LABEL_3` or `4 stars` to a zero-based class index.
pub fn label_index(label: &str) -> Option<usize> {
    let number: usize = NUMBER_RE.find(label)?.as_str().parse().ok()?;
    if label.to_ascii_lowercase().contains("star") {
        return number.checked_sub(1);
    }
    Some(number)
}
