//! Reference record model: an ordered collection of named, annotated fields.
//!
//! Each field says whether it holds one value per item or one value for the
//! whole record, how it behaves when the record is split, and how two
//! copies combine on merge. Item-carrying fields are arrays with a stride,
//! so `F32Array { stride: 3, .. }` holds one xyz triple per item.

use serde::{Deserialize, Serialize};

use crate::block::BlockDomain;
use crate::error::{RedistError, RedistResult};
use crate::record::{Record, Selection};

/// Name of the termination marker field.
pub const QUIT_FIELD: &str = "decaf_quit";

/// Name of the per-item position field read by spatial strategies.
pub const POSITION_FIELD: &str = "pos";

/// Name of the domain descriptor rewritten by the block strategy.
pub const DOMAIN_FIELD: &str = "domain_block";

/// Whether a field is sliced per item or shared by the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// One value for the whole record.
    Global,
    /// One value (of `stride` elements) per item.
    PerItem,
}

/// Ownership class of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldFlag {
    /// Pipeline control data, never split.
    System,
    /// Application payload.
    User,
}

/// Split behavior of a global field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitRule {
    /// Every chunk receives a copy.
    KeepValue,
    /// Per-item fields are sliced by the selection.
    Split,
}

/// Merge behavior when two records carry the same field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeRule {
    /// Keep the value already present.
    FirstValue,
    /// Concatenate the values.
    Append,
    /// Add scalar values.
    Sum,
}

/// Typed field payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Integer scalar.
    I64(i64),
    /// Float scalar.
    F64(f64),
    /// Float array, `stride` elements per item.
    F32Array {
        /// Elements per item.
        stride: usize,
        /// Flattened values.
        values: Vec<f32>,
    },
    /// Integer array, `stride` elements per item.
    I64Array {
        /// Elements per item.
        stride: usize,
        /// Flattened values.
        values: Vec<i64>,
    },
    /// Opaque bytes.
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Grid domain descriptor.
    Block(BlockDomain),
}

impl FieldValue {
    fn item_count(&self) -> Option<u64> {
        match self {
            FieldValue::F32Array { stride, values } if *stride > 0 => {
                Some((values.len() / stride) as u64)
            }
            FieldValue::I64Array { stride, values } if *stride > 0 => {
                Some((values.len() / stride) as u64)
            }
            _ => None,
        }
    }

    fn slice(&self, selection: &Selection) -> FieldValue {
        fn take<T: Clone>(values: &[T], stride: usize, selection: &Selection) -> Vec<T> {
            let mut out = Vec::new();
            for span in selection {
                let start = (span.offset as usize * stride).min(values.len());
                let end = (span.end() as usize * stride).min(values.len());
                out.extend_from_slice(&values[start..end]);
            }
            out
        }
        match self {
            FieldValue::F32Array { stride, values } => FieldValue::F32Array {
                stride: *stride,
                values: take(values, *stride, selection),
            },
            FieldValue::I64Array { stride, values } => FieldValue::I64Array {
                stride: *stride,
                values: take(values, *stride, selection),
            },
            other => other.clone(),
        }
    }
}

/// One annotated field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Item scope.
    pub scope: Scope,
    /// Ownership class.
    pub flag: FieldFlag,
    /// Split behavior.
    pub split: SplitRule,
    /// Merge behavior.
    pub merge: MergeRule,
    /// Payload.
    pub value: FieldValue,
}

impl Field {
    /// Per-item float array, appended on merge.
    pub fn per_item_f32(stride: usize, values: Vec<f32>) -> Self {
        Self {
            scope: Scope::PerItem,
            flag: FieldFlag::User,
            split: SplitRule::Split,
            merge: MergeRule::Append,
            value: FieldValue::F32Array { stride, values },
        }
    }

    /// Per-item integer array, appended on merge.
    pub fn per_item_i64(stride: usize, values: Vec<i64>) -> Self {
        Self {
            scope: Scope::PerItem,
            flag: FieldFlag::User,
            split: SplitRule::Split,
            merge: MergeRule::Append,
            value: FieldValue::I64Array { stride, values },
        }
    }

    /// Global value copied into every chunk.
    pub fn global(value: FieldValue, merge: MergeRule) -> Self {
        Self {
            scope: Scope::Global,
            flag: FieldFlag::User,
            split: SplitRule::KeepValue,
            merge,
            value,
        }
    }

    /// System value, duplicated and never merged.
    pub fn system(value: FieldValue) -> Self {
        Self {
            scope: Scope::Global,
            flag: FieldFlag::System,
            split: SplitRule::KeepValue,
            merge: MergeRule::FirstValue,
            value,
        }
    }

    fn merge_value(&mut self, other: FieldValue, name: &str) -> RedistResult<()> {
        match self.merge {
            MergeRule::FirstValue => Ok(()),
            MergeRule::Sum => match (&mut self.value, other) {
                (FieldValue::I64(a), FieldValue::I64(b)) => {
                    *a += b;
                    Ok(())
                }
                (FieldValue::F64(a), FieldValue::F64(b)) => {
                    *a += b;
                    Ok(())
                }
                _ => Err(mismatch(name)),
            },
            MergeRule::Append => match (&mut self.value, other) {
                (FieldValue::F32Array { stride: s, values: a }, FieldValue::F32Array { stride: t, values: b })
                    if *s == t =>
                {
                    a.extend(b);
                    Ok(())
                }
                (FieldValue::I64Array { stride: s, values: a }, FieldValue::I64Array { stride: t, values: b })
                    if *s == t =>
                {
                    a.extend(b);
                    Ok(())
                }
                (FieldValue::Bytes(a), FieldValue::Bytes(b)) => {
                    a.extend(b);
                    Ok(())
                }
                _ => Err(mismatch(name)),
            },
        }
    }
}

fn mismatch(name: &str) -> RedistError {
    RedistError::Configuration(format!("field '{}' cannot be merged with a value of another type", name))
}

/// Ordered named fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldRecord {
    fields: Vec<(String, Field)>,
}

impl FieldRecord {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a field, builder style.
    pub fn with(mut self, name: &str, field: Field) -> Self {
        self.insert(name, field);
        self
    }

    /// Adds or replaces a field.
    pub fn insert(&mut self, name: &str, field: Field) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = field,
            None => self.fields.push((name.to_string(), field)),
        }
    }

    /// Looks up a field.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<Field> {
        let pos = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(pos).1)
    }

    /// Field names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Integer array of a field, if it is one.
    pub fn i64_values(&self, name: &str) -> Option<&[i64]> {
        match &self.get(name)?.value {
            FieldValue::I64Array { values, .. } => Some(values),
            _ => None,
        }
    }

    /// Float array of a field, if it is one.
    pub fn f32_values(&self, name: &str) -> Option<&[f32]> {
        match &self.get(name)?.value {
            FieldValue::F32Array { values, .. } => Some(values),
            _ => None,
        }
    }

    fn item_counts(&self) -> impl Iterator<Item = Option<u64>> + '_ {
        self.fields
            .iter()
            .filter(|(_, f)| f.flag != FieldFlag::System && f.scope == Scope::PerItem)
            .map(|(_, f)| f.value.item_count())
    }
}

impl Record for FieldRecord {
    fn is_countable(&self) -> bool {
        let mut seen: Option<u64> = None;
        for count in self.item_counts() {
            match (count, seen) {
                (None, _) => return false,
                (Some(c), Some(s)) if c != s => return false,
                (Some(c), _) => seen = Some(c),
            }
        }
        true
    }

    fn item_count(&self) -> u64 {
        self.item_counts().flatten().max().unwrap_or(0)
    }

    fn split_by_ranges(&self, selections: &[Selection]) -> Vec<Self> {
        selections
            .iter()
            .map(|selection| FieldRecord {
                fields: self
                    .fields
                    .iter()
                    .map(|(name, field)| {
                        let value = if field.scope == Scope::PerItem && field.split == SplitRule::Split {
                            field.value.slice(selection)
                        } else {
                            field.value.clone()
                        };
                        (name.clone(), Field { value, ..field.clone() })
                    })
                    .collect(),
            })
            .collect()
    }

    fn merge_from(&mut self, other: Self) -> RedistResult<()> {
        for (name, field) in other.fields {
            match self.fields.iter_mut().find(|(n, _)| *n == name) {
                Some((_, mine)) => mine.merge_value(field.value, &name)?,
                None => self.fields.push((name, field)),
            }
        }
        Ok(())
    }

    fn is_system_tagged(&self) -> bool {
        !self.fields.is_empty() && self.fields.iter().all(|(_, f)| f.flag == FieldFlag::System)
    }

    fn quit() -> Self {
        FieldRecord::new().with(QUIT_FIELD, Field::system(FieldValue::I64(1)))
    }

    fn is_quit(&self) -> bool {
        self.get(QUIT_FIELD).is_some()
    }

    fn serialize_to_bytes(&self) -> RedistResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn deserialize_from_bytes(bytes: &[u8]) -> RedistResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn positions(&self) -> Option<Vec<[f32; 3]>> {
        match &self.get(POSITION_FIELD)?.value {
            FieldValue::F32Array { stride: 3, values } => Some(
                values
                    .chunks_exact(3)
                    .map(|c| [c[0], c[1], c[2]])
                    .collect(),
            ),
            _ => None,
        }
    }

    fn domain(&self) -> Option<BlockDomain> {
        match self.get(DOMAIN_FIELD)?.value {
            FieldValue::Block(domain) => Some(domain),
            _ => None,
        }
    }

    fn set_domain(&mut self, domain: BlockDomain) {
        let field = self
            .remove(DOMAIN_FIELD)
            .map(|f| Field {
                value: FieldValue::Block(domain),
                ..f
            })
            .unwrap_or_else(|| Field::global(FieldValue::Block(domain), MergeRule::FirstValue));
        self.insert(DOMAIN_FIELD, field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ItemSpan;

    fn particles(ids: Vec<i64>) -> FieldRecord {
        let pos = ids.iter().flat_map(|&i| [i as f32, 0.0, 0.0]).collect();
        FieldRecord::new()
            .with("id", Field::per_item_i64(1, ids))
            .with(POSITION_FIELD, Field::per_item_f32(3, pos))
            .with("step", Field::global(FieldValue::I64(3), MergeRule::FirstValue))
    }

    #[test]
    fn test_countable() {
        let r = particles(vec![1, 2, 3]);
        assert!(r.is_countable());
        assert_eq!(r.item_count(), 3);
        assert!(FieldRecord::new().is_countable());
        assert_eq!(FieldRecord::new().item_count(), 0);
    }

    #[test]
    fn test_incoherent_counts_not_countable() {
        let r = particles(vec![1, 2, 3]).with("mass", Field::per_item_f32(1, vec![1.0]));
        assert!(!r.is_countable());
    }

    #[test]
    fn test_per_item_scalar_not_countable() {
        let mut field = Field::global(FieldValue::I64(1), MergeRule::Sum);
        field.scope = Scope::PerItem;
        let r = FieldRecord::new().with("bad", field);
        assert!(!r.is_countable());
    }

    #[test]
    fn test_split_and_merge() {
        let r = particles(vec![10, 11, 12, 13, 14]);
        let chunks = r.split_by_ranges(&[
            vec![ItemSpan::new(0, 2)],
            vec![ItemSpan::new(2, 1), ItemSpan::new(4, 1)],
            vec![ItemSpan::new(3, 1)],
        ]);
        assert_eq!(chunks[0].i64_values("id").unwrap(), &[10, 11]);
        assert_eq!(chunks[1].i64_values("id").unwrap(), &[12, 14]);
        assert_eq!(chunks[1].f32_values(POSITION_FIELD).unwrap(), &[12.0, 0.0, 0.0, 14.0, 0.0, 0.0]);
        assert_eq!(chunks[2].item_count(), 1);

        let mut merged = FieldRecord::default();
        for c in chunks {
            merged.merge_from(c).unwrap();
        }
        assert_eq!(merged.i64_values("id").unwrap(), &[10, 11, 12, 14, 13]);
        assert_eq!(merged.item_count(), 5);
        assert_eq!(merged.get("step").unwrap().value, FieldValue::I64(3));
    }

    #[test]
    fn test_sum_merge() {
        let mut a = FieldRecord::new().with("n", Field::global(FieldValue::I64(2), MergeRule::Sum));
        let b = FieldRecord::new().with("n", Field::global(FieldValue::I64(5), MergeRule::Sum));
        a.merge_from(b).unwrap();
        assert_eq!(a.get("n").unwrap().value, FieldValue::I64(7));
    }

    #[test]
    fn test_merge_type_mismatch() {
        let mut a = FieldRecord::new().with("n", Field::global(FieldValue::I64(2), MergeRule::Sum));
        let b = FieldRecord::new().with("n", Field::global(FieldValue::F64(5.0), MergeRule::Sum));
        assert!(matches!(a.merge_from(b), Err(RedistError::Configuration(_))));
    }

    #[test]
    fn test_quit_marker() {
        let q = FieldRecord::quit();
        assert!(q.is_quit());
        assert!(q.is_system_tagged());
        assert!(!particles(vec![1]).is_quit());
        assert!(!particles(vec![1]).is_system_tagged());
        assert!(!FieldRecord::new().is_system_tagged());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let r = particles(vec![4, 5]);
        let bytes = r.serialize_to_bytes().unwrap();
        assert_eq!(FieldRecord::deserialize_from_bytes(&bytes).unwrap(), r);
        assert!(matches!(
            FieldRecord::deserialize_from_bytes(&bytes[..3]),
            Err(RedistError::Serialization(_))
        ));
    }

    #[test]
    fn test_positions_and_domain() {
        let r = particles(vec![1, 2]);
        assert_eq!(r.positions().unwrap(), vec![[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        assert!(r.domain().is_none());

        let mut r = r;
        let d = BlockDomain::whole(1.0, [0.0; 3], [4, 4, 4]);
        r.set_domain(d);
        assert_eq!(r.domain(), Some(d));
        let half = d.with_local_extents([0, 0, 0, 2, 4, 4]);
        r.set_domain(half);
        assert_eq!(r.domain(), Some(half));
        assert_eq!(r.names().filter(|n| *n == DOMAIN_FIELD).count(), 1);
    }
}
