//! Type-safe building blocks for topology definitions
//!
//! Key bounds, index directions, shard keys and shard references are modelled as
//! proper Rust types instead of loose JSON so ordering, equality and rendering
//! are exact and exhaustively matched.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

/// Literal used in topology files for the lowest possible key.
pub const MIN_KEY_LITERAL: &str = "$minKey";

/// Literal used in topology files for the highest possible key.
pub const MAX_KEY_LITERAL: &str = "$maxKey";

// ============================================================================
// Key values
// ============================================================================

/// A shard-key bound.
///
/// Variant order is the cluster's cross-type sort order, so the derived `Ord`
/// is the comparison used for range coverage: `Min < Int < Str < Date < Max`.
///
/// In topology files a bound is written as `"$minKey"`, `"$maxKey"`, an integer,
/// a string, or `{"$date": "2025-12-31T20:53:57.657Z"}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawKeyValue", into = "RawKeyValue")]
pub enum KeyValue {
    Min,
    Int(i64),
    Str(String),
    Date(DateTime<Utc>),
    Max,
}

impl KeyValue {
    #[inline]
    pub fn is_min(&self) -> bool {
        matches!(self, Self::Min)
    }

    #[inline]
    pub fn is_max(&self) -> bool {
        matches!(self, Self::Max)
    }

    /// Render as an extended-JSON value, as admin command documents expect it.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Min => json!({ "$minKey": 1 }),
            Self::Max => json!({ "$maxKey": 1 }),
            Self::Int(n) => json!(n),
            Self::Str(s) => json!(s),
            Self::Date(d) => json!({ "$date": d.to_rfc3339_opts(SecondsFormat::Millis, true) }),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Min => write!(f, "MinKey"),
            Self::Max => write!(f, "MaxKey"),
            Self::Int(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Date(d) => write!(
                f,
                "ISODate('{}')",
                d.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<DateTime<Utc>> for KeyValue {
    /// Cluster dates carry milliseconds; anything finer is dropped.
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value.trunc_subsecs(3))
    }
}

/// Wire form of a [`KeyValue`] inside topology and cluster-state files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawKeyValue {
    Int(i64),
    Date {
        #[serde(rename = "$date")]
        date: DateTime<Utc>,
    },
    Str(String),
}

impl TryFrom<RawKeyValue> for KeyValue {
    type Error = String;

    fn try_from(raw: RawKeyValue) -> Result<Self, Self::Error> {
        Ok(match raw {
            RawKeyValue::Int(n) => Self::Int(n),
            RawKeyValue::Date { date } => Self::from(date),
            RawKeyValue::Str(s) if s == MIN_KEY_LITERAL => Self::Min,
            RawKeyValue::Str(s) if s == MAX_KEY_LITERAL => Self::Max,
            RawKeyValue::Str(s) if s.starts_with('$') => {
                return Err(format!(
                    "unknown key literal '{}' (expected {} or {})",
                    s, MIN_KEY_LITERAL, MAX_KEY_LITERAL
                ));
            }
            RawKeyValue::Str(s) => Self::Str(s),
        })
    }
}

impl From<KeyValue> for RawKeyValue {
    fn from(value: KeyValue) -> Self {
        match value {
            KeyValue::Min => Self::Str(MIN_KEY_LITERAL.to_string()),
            KeyValue::Max => Self::Str(MAX_KEY_LITERAL.to_string()),
            KeyValue::Int(n) => Self::Int(n),
            KeyValue::Str(s) => Self::Str(s),
            KeyValue::Date(date) => Self::Date { date },
        }
    }
}

// ============================================================================
// Indexes
// ============================================================================

/// Index key direction. Written as `1`, `-1` or `"hashed"` in topology files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(try_from = "Value", into = "Value")]
pub enum Direction {
    #[strum(serialize = "1")]
    Ascending,
    #[strum(serialize = "-1")]
    Descending,
    #[strum(serialize = "hashed")]
    Hashed,
}

impl Direction {
    pub fn to_json(self) -> Value {
        match self {
            Self::Ascending => json!(1),
            Self::Descending => json!(-1),
            Self::Hashed => json!("hashed"),
        }
    }
}

impl TryFrom<Value> for Direction {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match &value {
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Self::Ascending),
            Value::Number(n) if n.as_i64() == Some(-1) => Ok(Self::Descending),
            Value::String(s) if s == "hashed" => Ok(Self::Hashed),
            other => Err(format!(
                "invalid index direction {} (expected 1, -1 or \"hashed\")",
                other
            )),
        }
    }
}

impl From<Direction> for Value {
    fn from(direction: Direction) -> Self {
        direction.to_json()
    }
}

/// One `field: direction` entry of an index key pattern.
///
/// Serialized as a two-element array, e.g. `["customerID", 1]`, so key order
/// survives JSON round trips.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, Direction)", into = "(String, Direction)")]
pub struct IndexKey {
    pub field: String,
    pub direction: Direction,
}

impl IndexKey {
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

impl From<(String, Direction)> for IndexKey {
    fn from((field, direction): (String, Direction)) -> Self {
        Self { field, direction }
    }
}

impl From<IndexKey> for (String, Direction) {
    fn from(key: IndexKey) -> Self {
        (key.field, key.direction)
    }
}

/// Options that distinguish two indexes sharing a key pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexOptions {
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IndexOptions {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// A secondary index definition: an ordered key pattern plus options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Vec<IndexKey>,
    #[serde(default, skip_serializing_if = "IndexOptions::is_default")]
    pub options: IndexOptions,
}

impl IndexSpec {
    /// Build an index from `(field, direction)` pairs with default options.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = (S, Direction)>,
        S: Into<String>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(|(field, direction)| IndexKey::new(field, direction))
                .collect(),
            options: IndexOptions::default(),
        }
    }

    /// Single-field ascending index.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new([(field, Direction::Ascending)])
    }

    /// Single-field hashed index.
    pub fn hashed(field: impl Into<String>) -> Self {
        Self::new([(field, Direction::Hashed)])
    }

    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// True when both indexes have the same ordered key pattern.
    pub fn same_pattern(&self, other: &IndexSpec) -> bool {
        self.keys == other.keys
    }

    /// The name the cluster derives when none is given: `customerID_1_orderStatus_1`.
    pub fn default_name(&self) -> String {
        self.keys
            .iter()
            .map(|k| format!("{}_{}", k.field, k.direction))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn effective_name(&self) -> String {
        self.options
            .name
            .clone()
            .unwrap_or_else(|| self.default_name())
    }

    /// Same key pattern but different options: the cluster refuses to build it.
    pub fn conflicts_with(&self, other: &IndexSpec) -> bool {
        self.same_pattern(other)
            && (self.options.unique != other.options.unique
                || self.effective_name() != other.effective_name())
    }

    /// Key pattern rendered as `{customerID: 1, orderStatus: 1}`.
    pub fn pattern(&self) -> String {
        let inner = self
            .keys
            .iter()
            .map(|k| format!("{}: {}", k.field, k.direction))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}", inner)
    }

    /// Key pattern as a JSON document, preserving key order.
    pub fn key_document(&self) -> Value {
        let mut doc = serde_json::Map::new();
        for key in &self.keys {
            doc.insert(key.field.clone(), key.direction.to_json());
        }
        Value::Object(doc)
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern())?;
        if self.options.unique {
            write!(f, " unique")?;
        }
        if let Some(name) = &self.options.name {
            write!(f, " name={}", name)?;
        }
        Ok(())
    }
}

// ============================================================================
// Shard keys and shard references
// ============================================================================

/// The field a collection is distributed by, and whether it is hashed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardKey {
    pub field: String,
    #[serde(default)]
    pub hashed: bool,
}

impl ShardKey {
    pub fn ranged(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            hashed: false,
        }
    }

    pub fn hashed(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            hashed: true,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.hashed {
            Direction::Hashed
        } else {
            Direction::Ascending
        }
    }

    /// The index the cluster requires before it accepts this shard key.
    pub fn supporting_index(&self) -> IndexSpec {
        IndexSpec::new([(self.field.clone(), self.direction())])
    }

    /// True when `index` has this key as its prefix.
    pub fn is_supported_by(&self, index: &IndexSpec) -> bool {
        index
            .keys
            .first()
            .is_some_and(|k| k.field == self.field && k.direction == self.direction())
    }

    pub fn key_document(&self) -> Value {
        self.supporting_index().key_document()
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: {}}}", self.field, self.direction())
    }
}

/// A symbolic reference to a shard: by name, or by position in the shard directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShardRef {
    Position(usize),
    Name(String),
}

impl ShardRef {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
}

impl fmt::Display for ShardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{}", name),
            Self::Position(pos) => write!(f, "#{}", pos),
        }
    }
}

impl From<&str> for ShardRef {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<usize> for ShardRef {
    fn from(value: usize) -> Self {
        Self::Position(value)
    }
}
