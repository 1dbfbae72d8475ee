use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{AsRefStr, Display, EnumCount as EnumCountMacro, EnumIter, EnumString};

/// CIFAR-10 classes, in the index order the classifier emits them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumIter,
    EnumString,
    EnumCountMacro,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ClassLabel {
    Airplane,
    Automobile,
    Bird,
    Cat,
    Deer,
    Dog,
    Frog,
    Horse,
    Ship,
    Truck,
}

pub const CLASS_COUNT: usize = ClassLabel::COUNT;

impl ClassLabel {
    pub fn from_index(index: usize) -> Option<Self> {
        ClassLabel::iter().nth(index)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Per-class probabilities keyed by label. Always holds every label exactly
/// once, in label order; serialized as a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityTable(Vec<(ClassLabel, f32)>);

impl ProbabilityTable {
    /// Pairs `scores` with the labels by position. Returns `None` unless there
    /// is exactly one score per label.
    pub fn from_scores(scores: &[f32]) -> Option<Self> {
        if scores.len() != CLASS_COUNT {
            return None;
        }
        Some(Self(ClassLabel::iter().zip(scores.iter().copied()).collect()))
    }

    pub fn get(&self, label: ClassLabel) -> f32 {
        self.0[label.index()].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClassLabel, f32)> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> f32 {
        self.0.iter().map(|(_, p)| p).sum()
    }

    /// Highest-scoring label; the earliest label wins a tie.
    pub fn top(&self) -> (ClassLabel, f32) {
        let mut best = self.0[0];
        for &(label, probability) in &self.0[1..] {
            if probability > best.1 {
                best = (label, probability);
            }
        }
        best
    }
}

impl Serialize for ProbabilityTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, probability) in &self.0 {
            map.serialize_entry(label.as_ref(), probability)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProbabilityTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = ProbabilityTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a map with one probability per class label")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut seen: HashMap<ClassLabel, f32> = HashMap::with_capacity(CLASS_COUNT);
                while let Some((label, probability)) = access.next_entry::<ClassLabel, f32>()? {
                    if seen.insert(label, probability).is_some() {
                        return Err(de::Error::custom(format!("duplicate label `{}`", label)));
                    }
                }
                let mut entries = Vec::with_capacity(CLASS_COUNT);
                for label in ClassLabel::iter() {
                    let probability = seen
                        .get(&label)
                        .copied()
                        .ok_or_else(|| de::Error::custom(format!("missing label `{}`", label)))?;
                    entries.push((label, probability));
                }
                Ok(ProbabilityTable(entries))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClassificationResponse {
    pub filename: String,
    pub predicted_class: ClassLabel,
    pub probability: f32,
    pub probabilities: ProbabilityTable,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageEntry {
    pub filename: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageListResponse {
    pub images: Vec<ImageEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelStatus {
    pub ready: bool,
    pub model_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
