//! Window ↔ channel map.
//!
//! Only the logical side lives here. What a display slot actually shows is
//! asked from the hardware when needed.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{BusError, BusResult};
use crate::geometry::Rect;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowEntry {
    pub busy: bool,
    /// Last channel bound to the window. Kept after release so the next
    /// allocation moves on to the alternate channel.
    pub channel: Option<usize>,
    /// Active zoom, in decoded-picture coordinates.
    pub crop: Option<Rect>,
}

impl WindowEntry {
    /// Channel currently owned, if the window is busy.
    pub fn owned(&self) -> Option<usize> {
        if self.busy { self.channel } else { None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftDirection {
    /// Window `i` takes what window `i + offset` held.
    Up,
    /// Window `i + offset` takes what window `i` held.
    Down,
}

pub struct WindowTable {
    entries: Vec<WindowEntry>,
    /// Display slot → window it currently shows.
    slots: Vec<Option<usize>>,
    /// Live engine channels: decoder → display channel it was created for.
    live: HashMap<usize, usize>,
    /// Decoders with a scaling unit interposed.
    scalers: HashSet<usize>,
}

impl WindowTable {
    pub fn new(window_count: usize) -> Self {
        Self {
            entries: vec![WindowEntry::default(); window_count],
            slots: vec![None; window_count],
            live: HashMap::new(),
            scalers: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn check(&self, window: usize) -> BusResult<()> {
        if window < self.entries.len() {
            Ok(())
        } else {
            Err(BusError::InvalidArgument(format!(
                "window {} out of range",
                window
            )))
        }
    }

    pub fn entry(&self, window: usize) -> BusResult<&WindowEntry> {
        self.check(window)?;
        Ok(&self.entries[window])
    }

    pub fn entry_mut(&mut self, window: usize) -> BusResult<&mut WindowEntry> {
        self.check(window)?;
        Ok(&mut self.entries[window])
    }

    pub fn entries(&self) -> &[WindowEntry] {
        &self.entries
    }

    /// Busy window holding `channel`.
    pub fn owner_of(&self, channel: usize) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.owned() == Some(channel))
    }

    pub fn slot_of(&self, window: usize) -> Option<usize> {
        self.slots.iter().position(|w| *w == Some(window))
    }

    pub fn slots(&self) -> &[Option<usize>] {
        &self.slots
    }

    pub fn set_slot(&mut self, slot: usize, window: Option<usize>) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = window;
        }
    }

    pub fn clear_slots(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    pub fn decoder_owner(&self, decoder: usize) -> Option<usize> {
        self.live.get(&decoder).copied()
    }

    pub fn mark_decoder(&mut self, decoder: usize, channel: Option<usize>) {
        match channel {
            Some(c) => {
                self.live.insert(decoder, c);
            }
            None => {
                self.live.remove(&decoder);
            }
        }
    }

    pub fn has_scaler(&self, decoder: usize) -> bool {
        self.scalers.contains(&decoder)
    }

    pub fn mark_scaler(&mut self, decoder: usize, present: bool) {
        if present {
            self.scalers.insert(decoder);
        } else {
            self.scalers.remove(&decoder);
        }
    }

    pub fn swap(&mut self, a: usize, b: usize) -> BusResult<()> {
        self.check(a)?;
        self.check(b)?;
        self.entries.swap(a, b);
        Ok(())
    }

    /// Rotates the table and returns, for each new index, the index the entry
    /// came from.
    pub fn rotate(&mut self, offset: usize, direction: ShiftDirection) -> Vec<usize> {
        let n = self.entries.len();
        if n == 0 {
            return Vec::new();
        }
        let offset = offset % n;
        let permutation: Vec<usize> = (0..n)
            .map(|i| match direction {
                ShiftDirection::Up => (i + offset) % n,
                ShiftDirection::Down => (i + n - offset) % n,
            })
            .collect();
        let old = self.entries.clone();
        self.entries = permutation.iter().map(|&from| old[from]).collect();
        permutation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_channels(n: usize) -> WindowTable {
        let mut table = WindowTable::new(n);
        for w in 0..n {
            let e = table.entry_mut(w).unwrap();
            e.busy = true;
            e.channel = Some(w);
        }
        table
    }

    #[test]
    fn rotate_up_is_left_rotation() {
        let mut table = table_with_channels(4);
        let perm = table.rotate(1, ShiftDirection::Up);
        assert_eq!(perm, vec![1, 2, 3, 0]);
        let channels: Vec<_> = table.entries().iter().map(|e| e.channel).collect();
        assert_eq!(channels, vec![Some(1), Some(2), Some(3), Some(0)]);
    }

    #[test]
    fn rotate_down_wraps() {
        let mut table = table_with_channels(4);
        let perm = table.rotate(5, ShiftDirection::Down);
        assert_eq!(perm, vec![3, 0, 1, 2]);
    }

    #[test]
    fn owner_ignores_free_windows() {
        let mut table = table_with_channels(2);
        table.entry_mut(1).unwrap().busy = false;
        assert_eq!(table.owner_of(0), Some(0));
        assert_eq!(table.owner_of(1), None);
    }

    #[test]
    fn out_of_range_window() {
        let mut table = WindowTable::new(2);
        assert!(table.entry(2).is_err());
        assert!(table.swap(0, 3).is_err());
    }
}
