use std::collections::BTreeSet;

use crate::scheduler::job::StageType;

const DEFAULT_RENDERABLE: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

const DEFAULT_CONVERTIBLE: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.oasis.opendocument.text",
    "application/rtf",
    "text/plain",
    "text/markdown",
    "text/csv",
    "text/html",
];

/// Stages switched on globally. A stage outside this set is never scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFlags {
    enabled: BTreeSet<StageType>,
}

impl StageFlags {
    pub fn all() -> Self {
        Self::from_enabled(StageType::ALL)
    }

    pub fn from_enabled(stages: impl IntoIterator<Item = StageType>) -> Self {
        Self {
            enabled: stages.into_iter().collect(),
        }
    }

    pub fn is_enabled(&self, stage: StageType) -> bool {
        self.enabled.contains(&stage)
    }
}

/// Maps a content type to the ordered stages that must run for it.
///
/// Content types are added by registration; `required_stages` itself never
/// changes when a new type is supported.
#[derive(Debug, Clone)]
pub struct StagePolicy {
    flags: StageFlags,
    renderable: BTreeSet<String>,
    convertible: BTreeSet<String>,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self::new(StageFlags::all())
    }
}

impl StagePolicy {
    /// Policy with the built-in renderable and convertible types registered.
    pub fn new(flags: StageFlags) -> Self {
        let mut policy = Self::empty(flags);
        for content_type in DEFAULT_RENDERABLE {
            policy.register_renderable(content_type);
        }
        for content_type in DEFAULT_CONVERTIBLE {
            policy.register_convertible(content_type);
        }
        policy
    }

    /// Policy with no content types registered.
    pub fn empty(flags: StageFlags) -> Self {
        Self {
            flags,
            renderable: BTreeSet::new(),
            convertible: BTreeSet::new(),
        }
    }

    pub fn flags(&self) -> &StageFlags {
        &self.flags
    }

    pub fn register_renderable(&mut self, content_type: &str) {
        self.renderable.insert(normalize(content_type));
    }

    pub fn register_convertible(&mut self, content_type: &str) {
        self.convertible.insert(normalize(content_type));
    }

    pub fn is_renderable(&self, content_type: &str) -> bool {
        self.renderable.contains(&normalize(content_type))
    }

    pub fn is_convertible(&self, content_type: &str) -> bool {
        self.convertible.contains(&normalize(content_type))
    }

    /// Stages for a content type, in a fixed order. Unsupported types yield a
    /// partial or empty list.
    ///
    /// Convertible types pull in conversion, metadata and text extraction
    /// together; each is then kept only if its flag is on.
    pub fn required_stages(&self, content_type: &str) -> Vec<StageType> {
        let mut candidates = Vec::with_capacity(StageType::ALL.len());
        candidates.push(StageType::MalwareScan);
        if self.is_renderable(content_type) {
            candidates.push(StageType::ThumbnailGeneration);
        }
        if self.is_convertible(content_type) {
            candidates.extend([
                StageType::DocumentConversion,
                StageType::MetadataExtraction,
                StageType::TextExtraction,
            ]);
        }
        candidates.retain(|stage| self.flags.is_enabled(*stage));
        candidates
    }
}

/// `Text/Plain; charset=utf-8` -> `text/plain`
fn normalize(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
