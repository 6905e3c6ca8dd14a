//! Insertion-ordered collection of named fields with per-field metadata.
//!
//! A [`Container`] is the unit of exchange between process groups. It can
//! be split into per-destination chunks (by item counts, item runs or
//! spatial blocks), merged back from chunks, and serialized to an opaque
//! byte blob. Derived metadata (item count, countability) is computed from
//! the fields on demand.
//!
//! # Countability
//! Fields in SYSTEM scope never take part in item arithmetic. Among the
//! other fields, every field holding more than one item must agree on the
//! count; `Block` fields make the container non-countable. The item count
//! is the largest count of a PRIVATE field.

use crate::data::block::Block;
use crate::data::field::Field;
use crate::data::morton::morton_decode;
use crate::data::payload::Element;
use crate::data::policy::{Flags, MergePolicy, Scope, SplitPolicy};
use crate::redist_error::RedistError;
use bytes::Bytes;
use hashbrown::HashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A field with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataField {
    pub field: Field,
    pub flags: Flags,
    pub scope: Scope,
    pub split_policy: SplitPolicy,
    pub merge_policy: MergePolicy,
}

impl DataField {
    pub fn new(
        field: Field,
        flags: Flags,
        scope: Scope,
        split_policy: SplitPolicy,
        merge_policy: MergePolicy,
    ) -> Self {
        Self {
            field,
            flags,
            scope,
            split_policy,
            merge_policy,
        }
    }

    /// SYSTEM fields and KEEP_VALUE fields go whole into every chunk.
    fn is_replicated(&self) -> bool {
        self.scope == Scope::System || self.split_policy == SplitPolicy::KeepValue
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct Meta {
    nb_items: usize,
    countable: bool,
    partially_countable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Container {
    fields: Vec<(String, DataField)>,
    system: bool,
    #[serde(skip)]
    index: HashMap<String, usize>,
    #[serde(skip)]
    merge_order: Vec<String>,
    #[serde(skip)]
    split_order: Vec<String>,
    #[serde(skip)]
    stored: Vec<Container>,
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.system == other.system && self.fields == other.fields
    }
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
    }

    // ---------------------------------------------------------------------
    // Field management
    // ---------------------------------------------------------------------

    pub fn append_data(
        &mut self,
        name: impl Into<String>,
        field: Field,
        flags: Flags,
        scope: Scope,
        split_policy: SplitPolicy,
        merge_policy: MergePolicy,
    ) -> Result<(), RedistError> {
        self.append(
            name,
            DataField::new(field, flags, scope, split_policy, merge_policy),
        )
    }

    pub fn append(&mut self, name: impl Into<String>, data: DataField) -> Result<(), RedistError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            log::error!("field `{name}` already exists in the container");
            return Err(RedistError::DuplicateField(name));
        }
        self.check_flags(&name, &data)?;
        check_shape(&name, &data.field)?;
        self.index.insert(name.clone(), self.fields.len());
        self.fields.push((name, data));
        Ok(())
    }

    fn check_flags(&self, name: &str, data: &DataField) -> Result<(), RedistError> {
        let invalid = |reason: &str| {
            log::error!("invalid flag on field `{name}`: {reason}");
            Err(RedistError::InvalidFlag {
                name: name.to_string(),
                reason: reason.to_string(),
            })
        };
        if data.flags.contains(Flags::ZCURVEKEY) {
            if self.find_flag(Flags::ZCURVEKEY).is_some() {
                return invalid("a ZCURVEKEY field is already present");
            }
            if data.field.values::<f32>().is_none() || data.field.element_per_items() != 3 {
                return invalid("ZCURVEKEY requires f32 positions with 3 elements per item");
            }
        }
        if data.flags.contains(Flags::ZCURVEINDEX) {
            if self.find_flag(Flags::ZCURVEINDEX).is_some() {
                return invalid("a ZCURVEINDEX field is already present");
            }
            if data.field.values::<u32>().is_none() {
                return invalid("ZCURVEINDEX requires u32 values");
            }
        }
        Ok(())
    }

    fn find_flag(&self, flag: Flags) -> Option<&DataField> {
        self.fields
            .iter()
            .map(|(_, d)| d)
            .find(|d| d.flags.contains(flag))
    }

    pub fn remove_data(&mut self, name: &str) -> bool {
        match self.index.get(name).copied() {
            Some(i) => {
                self.fields.remove(i);
                self.rebuild_index();
                true
            }
            None => false,
        }
    }

    /// Replace the value of a field, keeping its metadata.
    pub fn update_data(&mut self, name: &str, field: Field) -> Result<(), RedistError> {
        let Some(&i) = self.index.get(name) else {
            log::error!("field `{name}` not found, unable to update it");
            return Err(RedistError::MissingField(name.to_string()));
        };
        check_shape(name, &field)?;
        self.fields[i].1.field = field;
        Ok(())
    }

    pub fn has_data(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get_data_field(&self, name: &str) -> Option<&DataField> {
        self.index.get(name).map(|&i| &self.fields[i].1)
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.get_data_field(name).map(|d| &d.field)
    }

    pub fn get_simple<T: Element>(&self, name: &str) -> Option<T> {
        self.get_field(name)?.as_simple::<T>().cloned()
    }

    pub fn get_values<T: Element>(&self, name: &str) -> Option<&[T]> {
        self.get_field(name)?.values::<T>()
    }

    pub fn get_block(&self, name: &str) -> Option<&Block> {
        self.get_field(name)?.as_block()
    }

    pub fn type_name(&self, name: &str) -> Option<String> {
        self.get_field(name).map(Field::type_name)
    }

    /// Field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Names of the non-SYSTEM fields.
    pub fn list_user_keys(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, d)| d.scope != Scope::System)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn nb_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn nb_system_fields(&self) -> usize {
        self.fields
            .iter()
            .filter(|(_, d)| d.scope == Scope::System)
            .count()
    }

    pub fn has_system(&self) -> bool {
        self.nb_system_fields() > 0
    }

    /// No field outside SYSTEM scope.
    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(|(_, d)| d.scope == Scope::System)
    }

    /// A system container is sent whole to every destination.
    pub fn set_system(&mut self, system: bool) {
        self.system = system;
    }

    pub fn is_system(&self) -> bool {
        self.system
    }

    pub fn zcurve_key(&self) -> Option<&[f32]> {
        self.find_flag(Flags::ZCURVEKEY)?.field.values::<f32>()
    }

    pub fn zcurve_index(&self) -> Option<&[u32]> {
        self.find_flag(Flags::ZCURVEINDEX)?.field.values::<u32>()
    }

    /// Copy every SYSTEM field of `from`, replacing same-named fields.
    pub fn copy_system_fields(&mut self, from: &Container) {
        for (name, d) in from.fields.iter().filter(|(_, d)| d.scope == Scope::System) {
            match self.index.get(name) {
                Some(&i) => self.fields[i].1 = d.clone(),
                None => {
                    self.index.insert(name.clone(), self.fields.len());
                    self.fields.push((name.clone(), d.clone()));
                }
            }
        }
    }

    /// Container holding only the SYSTEM fields.
    pub fn system_only(&self) -> Container {
        let mut out = Container::new();
        out.copy_system_fields(self);
        out.system = self.system;
        out
    }

    /// Empty every buffer but keep the schema.
    pub fn soft_clean(&mut self) {
        for (_, d) in self.fields.iter_mut() {
            d.field.soft_clean();
        }
        self.stored.clear();
    }

    pub fn purge_data(&mut self) {
        self.fields.clear();
        self.index.clear();
        self.stored.clear();
        self.system = false;
    }

    // ---------------------------------------------------------------------
    // Ordering
    // ---------------------------------------------------------------------

    fn check_order(&self, names: &[&str]) -> Result<Vec<String>, RedistError> {
        let distinct = names.iter().all_unique();
        if names.len() != self.fields.len() || !distinct {
            return Err(RedistError::InvalidConfig(format!(
                "field order lists {} names for {} fields",
                names.len(),
                self.fields.len()
            )));
        }
        if let Some(missing) = names.iter().find(|n| !self.index.contains_key(**n)) {
            return Err(RedistError::MissingField(missing.to_string()));
        }
        Ok(names.iter().map(|n| n.to_string()).collect())
    }

    /// Order in which fields are merged; must list every field exactly once.
    pub fn set_merge_order(&mut self, names: &[&str]) -> Result<(), RedistError> {
        self.merge_order = self.check_order(names)?;
        Ok(())
    }

    /// Order in which fields are split and laid out in the chunks.
    pub fn set_split_order(&mut self, names: &[&str]) -> Result<(), RedistError> {
        self.split_order = self.check_order(names)?;
        Ok(())
    }

    /// Field indices in `order`, then the remaining fields in insertion order.
    fn ordered(&self, order: &[String]) -> Vec<usize> {
        let mut out: Vec<usize> = order
            .iter()
            .filter_map(|n| self.index.get(n).copied())
            .collect();
        let rest: Vec<usize> = (0..self.fields.len()).filter(|i| !out.contains(i)).collect();
        out.extend(rest);
        out
    }

    // ---------------------------------------------------------------------
    // Item arithmetic
    // ---------------------------------------------------------------------

    fn meta(&self) -> Meta {
        let mut meta = Meta {
            nb_items: 0,
            countable: true,
            partially_countable: true,
        };
        let mut multi: Option<usize> = None;
        for (name, d) in self.fields.iter().filter(|(_, d)| d.scope != Scope::System) {
            if !d.field.is_countable() {
                meta.countable = false;
                continue;
            }
            let n = d.field.nb_items();
            if n > 1 {
                match multi {
                    Some(m) if m != n => {
                        log::warn!(
                            "incoherent item counts: field `{name}` has {n} items, others {m}"
                        );
                        meta.countable = false;
                        meta.partially_countable = false;
                    }
                    _ => multi = Some(n),
                }
            }
            if d.scope == Scope::Private {
                meta.nb_items = meta.nb_items.max(n);
            }
        }
        meta
    }

    pub fn is_countable(&self) -> bool {
        self.meta().countable
    }

    pub fn is_partially_countable(&self) -> bool {
        self.meta().partially_countable
    }

    pub fn nb_items(&self) -> usize {
        self.meta().nb_items
    }

    // ---------------------------------------------------------------------
    // Split
    // ---------------------------------------------------------------------

    fn build_chunks<F>(&self, nb_chunks: usize, mut split: F) -> Result<Vec<Container>, RedistError>
    where
        F: FnMut(&DataField) -> Result<Vec<Field>, RedistError>,
    {
        let mut chunks: Vec<Container> = (0..nb_chunks)
            .map(|_| Container {
                system: self.system,
                ..Container::default()
            })
            .collect();
        for i in self.ordered(&self.split_order) {
            let (name, d) = &self.fields[i];
            let parts = if d.is_replicated() {
                vec![d.field.clone(); nb_chunks]
            } else {
                split(d)?
            };
            for (chunk, part) in chunks.iter_mut().zip(parts) {
                chunk.index.insert(name.clone(), chunk.fields.len());
                chunk.fields.push((name.clone(), DataField { field: part, ..d.clone() }));
            }
        }
        Ok(chunks)
    }

    /// Chunk `i` gets the next `counts[i]` items.
    pub fn split_counts(&self, counts: &[usize]) -> Result<Vec<Container>, RedistError> {
        let meta = self.meta();
        if !meta.countable {
            log::error!("split by counts of a non-countable container");
            return Err(RedistError::NotCountable);
        }
        let total: usize = counts.iter().sum();
        if total != meta.nb_items {
            log::error!(
                "split ranges cover {total} items, the container holds {}",
                meta.nb_items
            );
            return Err(RedistError::RangeMismatch {
                expected: meta.nb_items,
                got: total,
            });
        }
        self.build_chunks(counts.len(), |d| d.field.split_counts(counts, d.split_policy))
    }

    /// Chunk `i` gets the item runs `segments[i]`.
    pub fn split_segments(
        &self,
        segments: &[Vec<Range<usize>>],
    ) -> Result<Vec<Container>, RedistError> {
        if !self.meta().partially_countable {
            log::error!("split by segments of a container with incoherent item counts");
            return Err(RedistError::NotCountable);
        }
        self.build_chunks(segments.len(), |d| {
            d.field.split_segments(segments, d.split_policy)
        })
    }

    /// Chunk `i` gets what falls inside `blocks[i]`'s local region. Block
    /// fields are cut geometrically, item fields by their spatial key.
    pub fn split_blocks(&self, blocks: &[Block]) -> Result<Vec<Container>, RedistError> {
        let needs_items = self.fields.iter().any(|(_, d)| {
            !d.is_replicated()
                && !d.field.is_block_splitable()
                && !matches!(d.field, Field::Simple(_))
        });
        let segments = if needs_items {
            Some(self.block_segments(blocks)?)
        } else {
            None
        };
        self.build_chunks(blocks.len(), |d| {
            if d.field.is_block_splitable() {
                d.field.split_blocks(blocks, d.split_policy)
            } else {
                let empty = vec![Vec::new(); blocks.len()];
                d.field
                    .split_segments(segments.as_ref().unwrap_or(&empty), d.split_policy)
            }
        })
    }

    /// Item runs per block from the ZCURVEINDEX field, else the ZCURVEKEY
    /// field. A point may fall inside several blocks.
    fn block_segments(&self, blocks: &[Block]) -> Result<Vec<Vec<Range<usize>>>, RedistError> {
        let mut segments = vec![Vec::new(); blocks.len()];
        let mut outside = 0usize;
        let mut place = |item: usize, hit: &dyn Fn(&Block) -> bool| {
            let mut found = false;
            for (b, runs) in blocks.iter().zip(segments.iter_mut()) {
                if hit(b) {
                    push_item(runs, item);
                    found = true;
                }
            }
            if !found {
                outside += 1;
            }
        };
        if let Some(index) = self.zcurve_index() {
            for (item, &code) in index.iter().enumerate() {
                let cell = morton_decode(code);
                place(item, &|b: &Block| b.is_in_local_cells(cell));
            }
        } else if let Some(pos) = self.zcurve_key() {
            for (item, p) in pos.chunks_exact(3).enumerate() {
                let p = [p[0], p[1], p[2]];
                place(item, &|b: &Block| b.is_in_local_block(p));
            }
        } else {
            log::error!("block split needs a ZCURVEINDEX or ZCURVEKEY field");
            return Err(RedistError::MissingZCurveKey);
        }
        if outside > 0 {
            log::warn!("{outside} items fall outside every block and are dropped");
        }
        Ok(segments)
    }

    // ---------------------------------------------------------------------
    // Merge
    // ---------------------------------------------------------------------

    /// Merge `other` into this container. Common fields are merged with the
    /// local merge policy; fields missing locally are inserted.
    ///
    /// A field that fails to merge is left as it was and the other fields
    /// are still merged; the first error is returned.
    pub fn merge(&mut self, other: &Container) -> Result<(), RedistError> {
        if self.fields.is_empty() {
            self.fields = other.fields.clone();
            self.system = other.system;
            self.rebuild_index();
            return Ok(());
        }
        let mut first_err = None;
        for i in self.ordered(&self.merge_order) {
            let (name, d) = &mut self.fields[i];
            if let Some(o) = other.get_field(name.as_str()) {
                if let Err(e) = d.field.merge(o, d.merge_policy) {
                    log::warn!("field `{name}` not merged: {e}");
                    first_err.get_or_insert(e);
                }
            }
        }
        for (name, d) in &other.fields {
            if !self.index.contains_key(name) {
                if let Err(e) = self.append(name.clone(), d.clone()) {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn merge_bytes(&mut self, buf: &[u8]) -> Result<(), RedistError> {
        let other = Container::deserialize(buf)?;
        self.merge(&other)
    }

    /// Deferred merge: the chunk is kept until [`merge_stored_data`](Self::merge_stored_data).
    pub fn unserialize_and_store(&mut self, buf: &[u8]) -> Result<(), RedistError> {
        let other = Container::deserialize(buf)?;
        self.store(other)
    }

    pub fn store(&mut self, other: Container) -> Result<(), RedistError> {
        if self.fields.is_empty() {
            return self.merge(&other);
        }
        self.stored.push(other);
        Ok(())
    }

    pub fn nb_stored(&self) -> usize {
        self.stored.len()
    }

    /// Merge every stored chunk at once, reserving the final sizes first.
    pub fn merge_stored_data(&mut self) -> Result<(), RedistError> {
        let stored = std::mem::take(&mut self.stored);
        if stored.is_empty() {
            return Ok(());
        }
        let local: Vec<String> = self.fields.iter().map(|(n, _)| n.clone()).collect();
        let mut first_err = None;
        for i in self.ordered(&self.merge_order) {
            let (name, d) = &mut self.fields[i];
            let name = name.as_str();
            let others: Vec<&Field> = stored.iter().filter_map(|c| c.get_field(name)).collect();
            if let Err(e) = d.field.merge_many(&others, d.merge_policy) {
                log::warn!("field `{name}` not fully merged: {e}");
                first_err.get_or_insert(e);
            }
        }
        for c in &stored {
            for (name, d) in c.fields.iter().filter(|(n, _)| !local.contains(n)) {
                let res = match self.index.get(name).copied() {
                    Some(i) => {
                        let policy = self.fields[i].1.merge_policy;
                        self.fields[i].1.field.merge(&d.field, policy)
                    }
                    None => self.append(name.clone(), d.clone()),
                };
                if let Err(e) = res {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    // ---------------------------------------------------------------------
    // Serialization
    // ---------------------------------------------------------------------

    pub fn serialize(&self) -> Result<Bytes, RedistError> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn deserialize(buf: &[u8]) -> Result<Container, RedistError> {
        let mut c: Container = bincode::deserialize(buf)?;
        c.rebuild_index();
        Ok(c)
    }
}

fn check_shape(name: &str, field: &Field) -> Result<(), RedistError> {
    if field.is_well_shaped() {
        return Ok(());
    }
    log::error!(
        "field `{name}`: payload is not a whole number of {}-element items",
        field.element_per_items()
    );
    Err(field.shape_error(name))
}

/// Append `item` to the runs, extending the last run when contiguous.
pub(crate) fn push_item(runs: &mut Vec<Range<usize>>, item: usize) {
    match runs.last_mut() {
        Some(r) if r.end == item => r.end += 1,
        _ => runs.push(item..item + 1),
    }
}
