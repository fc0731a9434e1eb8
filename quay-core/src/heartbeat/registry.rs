//! The slot table itself: pure state, no IO. The keeper wraps it in a
//! mutex; every mutation happens under that single lock.

use thiserror::Error;

/// Default slot capacity.
pub const REGISTRY_CAPACITY: usize = 1000;

/// Names longer than this are truncated at registration.
pub const MAX_NAME_LEN: usize = 50;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("heartbeat registry is full")]
    Full,

    #[error("keeper protocol error: {0}")]
    Proto(#[from] quay_proto::ProtoError),

    #[error("keeper refused: {0}")]
    Refused(String),
}

/// One occupied slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub pid: u32,
    pub name: String,
    pub timeout_secs: u64,
    pub last_beat: i64,
}

/// Fixed-capacity table of heartbeat slots.
#[derive(Debug)]
pub struct Registry {
    slots: Vec<Option<SlotRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_capacity(REGISTRY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Claim a slot for `pid`.
    ///
    /// A slot already owned by the same pid is reused (pids recycle, and a
    /// process may re-register under a new name, as the transfer server does
    /// per session). Otherwise the first free slot is claimed.
    pub fn register(
        &mut self,
        pid: u32,
        name: &str,
        timeout_secs: u64,
        now: i64,
    ) -> Result<usize, RegistryError> {
        let mut name = name.to_string();
        name.truncate(MAX_NAME_LEN);
        let record = SlotRecord {
            pid,
            name,
            timeout_secs: timeout_secs.max(1),
            last_beat: now,
        };

        if let Some(index) = self.find(pid) {
            self.slots[index] = Some(record);
            return Ok(index);
        }
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(record);
                Ok(index)
            }
            None => Err(RegistryError::Full),
        }
    }

    /// Stamp the owner's beat. Unknown pids are ignored (their slot may
    /// have been reaped between beats).
    pub fn beat(&mut self, pid: u32, now: i64) -> bool {
        match self.find(pid) {
            Some(index) => {
                if let Some(slot) = self.slots[index].as_mut() {
                    slot.last_beat = now;
                }
                true
            }
            None => false,
        }
    }

    /// Clear the slot owned by `pid`.
    pub fn unregister(&mut self, pid: u32) -> bool {
        match self.find(pid) {
            Some(index) => {
                self.slots[index] = None;
                true
            }
            None => false,
        }
    }

    pub fn clear_slot(&mut self, index: usize) {
        self.slots[index] = None;
    }

    pub fn find(&self, pid: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(record) if record.pid == pid))
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Snapshot of the occupied slots as `(index, record)` pairs.
    pub fn entries(&self) -> Vec<(usize, SlotRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.clone().map(|record| (index, record)))
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
