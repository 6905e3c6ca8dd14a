//! Frame buffers of the dataflow ranks.
//!
//! A [`Storage`] keeps containers indexed by frame id up to a fixed
//! capacity. A [`StorageCollection`] stacks several tiers (main memory,
//! files) under a placement policy and never drops a frame: when every
//! tier is full and no eviction applies, frames go to an unbounded
//! overflow area with a warning.

use super::frame::FrameCommand;
use super::{StorageCollectionPolicy, StorageType};
use crate::data::container::Container;
use crate::redist_error::RedistError;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub trait Storage {
    fn insert(&mut self, id: u32, data: Container) -> Result<(), RedistError>;
    fn get(&self, id: u32) -> Result<Option<Container>, RedistError>;
    fn remove(&mut self, id: u32) -> Result<(), RedistError>;
    fn has(&self, id: u32) -> bool;
    /// Stored ids in increasing order.
    fn ids(&self) -> Vec<u32>;
    fn capacity(&self) -> usize;

    fn len(&self) -> usize {
        self.ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    fn oldest(&self) -> Option<u32> {
        self.ids().first().copied()
    }

    /// Remove every frame `<= id`.
    fn remove_until(&mut self, id: u32) -> Result<(), RedistError> {
        for f in self.ids().into_iter().take_while(|f| *f <= id) {
            self.remove(f)?;
        }
        Ok(())
    }

    /// Remove every frame `< id`.
    fn remove_until_excluded(&mut self, id: u32) -> Result<(), RedistError> {
        for f in self.ids().into_iter().take_while(|f| *f < id) {
            self.remove(f)?;
        }
        Ok(())
    }

    fn apply(&mut self, command: FrameCommand, id: u32) -> Result<(), RedistError> {
        match command {
            FrameCommand::Remove => self.remove(id),
            FrameCommand::RemoveUntil => self.remove_until(id),
            FrameCommand::RemoveUntilExcluded => self.remove_until_excluded(id),
        }
    }
}

#[derive(Debug, Default)]
pub struct MainMemoryStorage {
    frames: BTreeMap<u32, Container>,
    capacity: usize,
}

impl MainMemoryStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            capacity,
        }
    }
}

impl Storage for MainMemoryStorage {
    fn insert(&mut self, id: u32, data: Container) -> Result<(), RedistError> {
        if self.frames.len() >= self.capacity && !self.frames.contains_key(&id) {
            return Err(RedistError::Storage(format!(
                "main memory storage full ({} frames)",
                self.capacity
            )));
        }
        self.frames.insert(id, data);
        Ok(())
    }

    fn get(&self, id: u32) -> Result<Option<Container>, RedistError> {
        Ok(self.frames.get(&id).cloned())
    }

    fn remove(&mut self, id: u32) -> Result<(), RedistError> {
        self.frames.remove(&id);
        Ok(())
    }

    fn has(&self, id: u32) -> bool {
        self.frames.contains_key(&id)
    }

    fn ids(&self) -> Vec<u32> {
        self.frames.keys().copied().collect()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.frames.len()
    }
}

/// One file per frame, `<folder>/save_<rank>_<id>`.
#[derive(Debug)]
pub struct FileStorage {
    folder: PathBuf,
    rank: usize,
    capacity: usize,
    frames: BTreeMap<u32, PathBuf>,
}

impl FileStorage {
    pub fn new(folder: impl Into<PathBuf>, rank: usize, capacity: usize) -> Self {
        Self {
            folder: folder.into(),
            rank,
            capacity,
            frames: BTreeMap::new(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn path_of(&self, id: u32) -> PathBuf {
        self.folder.join(format!("save_{}_{}", self.rank, id))
    }

    /// Reopen the frames listed in `<folder>/filelist_<rank>.txt`, as
    /// written by [`StorageCollection::save`].
    pub fn from_filelist(folder: impl Into<PathBuf>, rank: usize) -> Result<Self, RedistError> {
        let folder = folder.into();
        let list = fs::read_to_string(folder.join(format!("filelist_{rank}.txt")))?;
        let mut frames = BTreeMap::new();
        for line in list.lines().filter(|l| !l.trim().is_empty()) {
            let (id, path) = line.split_once(' ').ok_or_else(|| {
                RedistError::Storage(format!("malformed file list entry `{line}`"))
            })?;
            let id: u32 = id
                .parse()
                .map_err(|_| RedistError::Storage(format!("bad frame id `{id}`")))?;
            frames.insert(id, PathBuf::from(path));
        }
        log::info!("reopened {} frames from {}", frames.len(), folder.display());
        Ok(Self {
            capacity: frames.len(),
            folder,
            rank,
            frames,
        })
    }
}

impl Storage for FileStorage {
    fn insert(&mut self, id: u32, data: Container) -> Result<(), RedistError> {
        if self.frames.len() >= self.capacity {
            return Err(RedistError::Storage(format!(
                "file storage full ({} frames)",
                self.capacity
            )));
        }
        let path = self.path_of(id);
        if self.frames.contains_key(&id) {
            return Err(RedistError::Storage(format!(
                "frame {id} already stored in {}",
                path.display()
            )));
        }
        if path.exists() {
            log::warn!("replacing stale frame file {}", path.display());
        }
        fs::create_dir_all(&self.folder)?;
        let mut file = fs::File::create(&path)?;
        file.write_all(&data.serialize()?)?;
        self.frames.insert(id, path);
        Ok(())
    }

    fn get(&self, id: u32) -> Result<Option<Container>, RedistError> {
        match self.frames.get(&id) {
            Some(path) => Ok(Some(Container::deserialize(&fs::read(path)?)?)),
            None => Ok(None),
        }
    }

    fn remove(&mut self, id: u32) -> Result<(), RedistError> {
        if let Some(path) = self.frames.remove(&id) {
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("unable to remove {}: {e}", path.display());
            }
        }
        Ok(())
    }

    fn has(&self, id: u32) -> bool {
        self.frames.contains_key(&id)
    }

    fn ids(&self) -> Vec<u32> {
        self.frames.keys().copied().collect()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.frames.len()
    }
}

pub struct StorageCollection {
    policy: StorageCollectionPolicy,
    tiers: Vec<Box<dyn Storage>>,
    overflow: BTreeMap<u32, Container>,
}

impl StorageCollection {
    pub fn new(policy: StorageCollectionPolicy) -> Self {
        Self {
            policy,
            tiers: Vec::new(),
            overflow: BTreeMap::new(),
        }
    }

    /// Tiers from a list of types and capacities; file tiers live under
    /// `folder`.
    pub fn from_types(
        policy: StorageCollectionPolicy,
        types: &[StorageType],
        capacities: &[u32],
        folder: &Path,
        rank: usize,
    ) -> Result<Self, RedistError> {
        if types.len() != capacities.len() {
            return Err(RedistError::InvalidConfig(format!(
                "{} storage types for {} capacities",
                types.len(),
                capacities.len()
            )));
        }
        let mut out = Self::new(policy);
        for (t, &cap) in types.iter().zip(capacities) {
            match t {
                StorageType::MainMem => out.add_storage(MainMemoryStorage::new(cap as usize)),
                StorageType::File => out.add_storage(FileStorage::new(folder, rank, cap as usize)),
            }
        }
        Ok(out)
    }

    pub fn add_storage(&mut self, storage: impl Storage + 'static) {
        self.tiers.push(Box::new(storage));
    }

    pub fn nb_tiers(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_full(&self) -> bool {
        self.tiers.iter().all(|t| t.is_full())
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(|t| t.len()).sum::<usize>() + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nb_overflow(&self) -> usize {
        self.overflow.len()
    }

    pub fn has(&self, id: u32) -> bool {
        self.overflow.contains_key(&id) || self.tiers.iter().any(|t| t.has(id))
    }

    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .tiers
            .iter()
            .flat_map(|t| t.ids())
            .chain(self.overflow.keys().copied())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn insert(&mut self, id: u32, data: Container) -> Result<(), RedistError> {
        if let Some(tier) = self.tiers.iter_mut().find(|t| !t.is_full()) {
            return tier.insert(id, data);
        }
        if self.policy == StorageCollectionPolicy::Lru {
            let victim = self
                .tiers
                .iter()
                .enumerate()
                .filter_map(|(i, t)| t.oldest().map(|f| (f, i)))
                .min();
            if let Some((f, i)) = victim {
                log::debug!("storage full, evicting frame {f}");
                self.tiers[i].remove(f)?;
                return self.tiers[i].insert(id, data);
            }
        }
        log::warn!(
            "storage full, keeping frame {id} in the overflow area ({} frames)",
            self.overflow.len() + 1
        );
        self.overflow.insert(id, data);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Result<Option<Container>, RedistError> {
        if let Some(c) = self.overflow.get(&id) {
            return Ok(Some(c.clone()));
        }
        for t in &self.tiers {
            if t.has(id) {
                return t.get(id);
            }
        }
        Ok(None)
    }

    pub fn apply(&mut self, command: FrameCommand, id: u32) -> Result<(), RedistError> {
        match command {
            FrameCommand::Remove => {
                self.overflow.remove(&id);
            }
            FrameCommand::RemoveUntil => self.overflow.retain(|f, _| *f > id),
            FrameCommand::RemoveUntilExcluded => self.overflow.retain(|f, _| *f >= id),
        }
        for t in self.tiers.iter_mut() {
            t.apply(command, id)?;
        }
        Ok(())
    }

    /// Write every frame to `<folder>/save_<rank>_<id>` and list them in
    /// `<folder>/filelist_<rank>.txt`. Returns the number of frames saved.
    pub fn save(&self, rank: usize, folder: &Path) -> Result<usize, RedistError> {
        fs::create_dir_all(folder)?;
        let ids = self.ids();
        let mut spill = FileStorage::new(folder, rank, ids.len());
        let mut list = String::new();
        for id in &ids {
            if let Some(c) = self.get(*id)? {
                let path = spill.path_of(*id);
                spill.insert(*id, c)?;
                list.push_str(&format!("{id} {}\n", path.display()));
            }
        }
        fs::write(folder.join(format!("filelist_{rank}.txt")), list)?;
        log::info!("saved {} frames to {}", ids.len(), folder.display());
        Ok(ids.len())
    }
}
