//! Brush editing of a source mask with stroke-level undo/redo.
//!
//! A stroke runs from pointer-down to pointer-up. Every paint call inside it
//! is merged into one [`BrushStroke`] holding, per voxel, the value before the
//! stroke and the value after it. Sealed strokes go onto a bounded undo stack.

use cubemask_core::{Error, MaskVolume, Result, VoxelCoord, VoxelDelta};
use std::collections::{HashMap, VecDeque};

/// Default number of strokes kept for undo.
pub const DEFAULT_UNDO_DEPTH: usize = 100;

/// One sealed paint gesture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BrushStroke {
    deltas: Vec<VoxelDelta>,
}

impl BrushStroke {
    /// Net changes, one per voxel, in first-touched order.
    #[must_use]
    pub fn deltas(&self) -> &[VoxelDelta] {
        &self.deltas
    }

    /// Number of voxels changed by the stroke.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    /// True if the stroke changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// Open stroke: first `old` and latest `new` per voxel index.
#[derive(Debug, Default)]
struct StrokeBuilder {
    order: Vec<usize>,
    values: HashMap<usize, (i16, i16)>,
}

impl StrokeBuilder {
    fn record(&mut self, delta: VoxelDelta) {
        match self.values.get_mut(&delta.index) {
            Some(entry) => entry.1 = delta.new,
            None => {
                self.order.push(delta.index);
                self.values.insert(delta.index, (delta.old, delta.new));
            }
        }
    }

    fn seal(self) -> BrushStroke {
        let Self { order, values } = self;
        let deltas = order
            .into_iter()
            .filter_map(|index| {
                let (old, new) = values[&index];
                (old != new).then_some(VoxelDelta::new(index, old, new))
            })
            .collect();
        BrushStroke { deltas }
    }
}

/// Editor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrushState {
    /// No stroke open.
    #[default]
    Idle,
    /// A stroke is open.
    Painting,
}

/// Input events for hosts that drive the editor from a frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrushEvent {
    /// Pointer down: open a stroke.
    Begin,
    /// Pointer held at a voxel.
    Paint {
        /// Brush centre.
        center: VoxelCoord,
        /// Brush radius in voxels.
        radius: u32,
        /// Source id painted (or erased).
        value: i16,
        /// Paint when true, erase when false.
        additive: bool,
    },
    /// Pointer up: seal the stroke.
    End,
    /// Undo the last stroke.
    Undo,
    /// Redo the last undone stroke.
    Redo,
}

/// Owns a mask and records brush strokes for undo/redo.
///
/// The editor is the only writer of its mask while it holds it; take the mask
/// back with [`BrushEditor::into_mask`].
#[derive(Debug)]
pub struct BrushEditor {
    mask: MaskVolume,
    open: Option<StrokeBuilder>,
    undo: VecDeque<BrushStroke>,
    redo: Vec<BrushStroke>,
    max_history: usize,
    active_source: i16,
}

impl BrushEditor {
    /// Wraps a mask with the default undo depth.
    #[must_use]
    pub fn new(mask: MaskVolume) -> Self {
        Self::with_undo_depth(mask, DEFAULT_UNDO_DEPTH)
    }

    /// Wraps a mask keeping at most `depth` strokes (at least one).
    #[must_use]
    pub fn with_undo_depth(mask: MaskVolume, depth: usize) -> Self {
        let active_source = mask.next_source_id();
        Self {
            mask,
            open: None,
            undo: VecDeque::new(),
            redo: Vec::new(),
            max_history: depth.max(1),
            active_source,
        }
    }

    /// The edited mask.
    #[must_use]
    pub fn mask(&self) -> &MaskVolume {
        &self.mask
    }

    /// Releases the mask, dropping history.
    #[must_use]
    pub fn into_mask(self) -> MaskVolume {
        self.mask
    }

    /// Clears the mask's changed flag after the host saved it.
    pub fn mark_saved(&mut self) {
        self.mask.mark_saved();
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BrushState {
        if self.open.is_some() {
            BrushState::Painting
        } else {
            BrushState::Idle
        }
    }

    /// True while a stroke is open.
    #[must_use]
    pub fn is_painting(&self) -> bool {
        self.open.is_some()
    }

    /// Source id used by [`BrushEditor::paint_active`].
    #[must_use]
    pub fn active_source(&self) -> i16 {
        self.active_source
    }

    /// Selects the source id to paint with.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSourceId`] for ids below one.
    pub fn set_active_source(&mut self, id: i16) -> Result<()> {
        if id < 1 {
            return Err(Error::InvalidSourceId(id));
        }
        self.active_source = id;
        Ok(())
    }

    /// Makes a fresh, unused id the active source and returns it.
    pub fn new_source(&mut self) -> i16 {
        self.active_source = self.mask.next_source_id();
        self.active_source
    }

    /// Opens a stroke.
    ///
    /// # Errors
    /// Returns [`Error::StrokeInProgress`] if one is already open; the open
    /// stroke is kept.
    pub fn begin_stroke(&mut self) -> Result<()> {
        if self.open.is_some() {
            return Err(Error::StrokeInProgress);
        }
        self.open = Some(StrokeBuilder::default());
        Ok(())
    }

    /// Paints into the open stroke; returns how many voxels changed.
    ///
    /// # Errors
    /// [`Error::NoActiveStroke`] when idle; otherwise the errors of
    /// [`MaskVolume::paint`]. A failed call leaves the stroke open.
    pub fn paint_at(
        &mut self,
        center: VoxelCoord,
        radius: u32,
        value: i16,
        additive: bool,
    ) -> Result<usize> {
        let stroke = self.open.as_mut().ok_or(Error::NoActiveStroke)?;
        let deltas = self.mask.paint(center, radius, value, additive)?;
        let changed = deltas.len();
        for delta in deltas {
            stroke.record(delta);
        }
        Ok(changed)
    }

    /// [`BrushEditor::paint_at`] with the active source.
    ///
    /// # Errors
    /// As [`BrushEditor::paint_at`].
    pub fn paint_active(&mut self, center: VoxelCoord, radius: u32, additive: bool) -> Result<usize> {
        self.paint_at(center, radius, self.active_source, additive)
    }

    /// Seals the open stroke and returns the number of voxels it changed.
    ///
    /// A stroke with net changes goes onto the undo stack and clears the redo
    /// stack. A stroke that changed nothing is dropped.
    ///
    /// # Errors
    /// Returns [`Error::NoActiveStroke`] when idle.
    pub fn end_stroke(&mut self) -> Result<usize> {
        let stroke = self.open.take().ok_or(Error::NoActiveStroke)?.seal();
        let changed = stroke.len();
        if stroke.is_empty() {
            log::debug!("discarding empty brush stroke");
            return Ok(0);
        }
        self.redo.clear();
        if self.undo.len() == self.max_history {
            self.undo.pop_front();
            log::debug!("undo history full, dropped oldest stroke");
        }
        self.undo.push_back(stroke);
        log::debug!("sealed brush stroke touching {changed} voxels");
        Ok(changed)
    }

    /// Reverts the most recent stroke. Returns false if there was none.
    ///
    /// # Errors
    /// Returns [`Error::StrokeInProgress`] while painting.
    pub fn undo(&mut self) -> Result<bool> {
        if self.open.is_some() {
            return Err(Error::StrokeInProgress);
        }
        let Some(stroke) = self.undo.pop_back() else {
            return Ok(false);
        };
        self.mask.apply_deltas(stroke.deltas(), false)?;
        self.redo.push(stroke);
        Ok(true)
    }

    /// Re-applies the most recently undone stroke. Returns false if there was
    /// none.
    ///
    /// # Errors
    /// Returns [`Error::StrokeInProgress`] while painting.
    pub fn redo(&mut self) -> Result<bool> {
        if self.open.is_some() {
            return Err(Error::StrokeInProgress);
        }
        let Some(stroke) = self.redo.pop() else {
            return Ok(false);
        };
        self.mask.apply_deltas(stroke.deltas(), true)?;
        self.undo.push_back(stroke);
        Ok(true)
    }

    /// Number of strokes that can be undone.
    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Number of strokes that can be redone.
    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Maximum undo depth.
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.max_history
    }

    /// Forgets all undo/redo history.
    pub fn clear_history(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Feeds one input event through the editor and returns the new state.
    ///
    /// # Errors
    /// The error of the operation the event maps to.
    pub fn on_event(&mut self, event: BrushEvent) -> Result<BrushState> {
        match event {
            BrushEvent::Begin => self.begin_stroke()?,
            BrushEvent::Paint {
                center,
                radius,
                value,
                additive,
            } => {
                self.paint_at(center, radius, value, additive)?;
            }
            BrushEvent::End => {
                self.end_stroke()?;
            }
            BrushEvent::Undo => {
                self.undo()?;
            }
            BrushEvent::Redo => {
                self.redo()?;
            }
        }
        Ok(self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubemask_core::Dims;

    fn editor() -> BrushEditor {
        BrushEditor::new(MaskVolume::allocate(Dims::new(4, 4, 4)).unwrap())
    }

    #[test]
    fn test_single_source_paint_and_undo() {
        let mut ed = editor();
        ed.begin_stroke().unwrap();
        ed.paint_at(VoxelCoord::new(1, 1, 1), 1, 5, true).unwrap();
        assert_eq!(ed.end_stroke().unwrap(), 7);

        let mask = ed.mask();
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    let d2 = (x as i64 - 1).pow(2) + (y as i64 - 1).pow(2) + (z as i64 - 1).pow(2);
                    let expected = if d2 <= 1 { 5 } else { 0 };
                    assert_eq!(mask.voxel(x, y, z).unwrap(), expected);
                }
            }
        }

        assert!(ed.undo().unwrap());
        assert!(ed.mask().data().iter().all(|&v| v == 0));
        assert!(ed.redo().unwrap());
        assert_eq!(ed.mask().voxel_count(5), 7);
    }

    #[test]
    fn test_overlapping_paints_merge_into_net_deltas() {
        let mut ed = editor();
        ed.begin_stroke().unwrap();
        ed.paint_at(VoxelCoord::new(1, 1, 1), 1, 2, true).unwrap();
        ed.paint_at(VoxelCoord::new(1, 1, 2), 1, 2, true).unwrap();
        // erase back a voxel painted earlier in the same stroke
        ed.paint_at(VoxelCoord::new(1, 1, 0), 0, 2, false).unwrap();
        let changed = ed.end_stroke().unwrap();
        assert_eq!(changed, ed.mask().voxel_count(2));

        assert!(ed.undo().unwrap());
        assert_eq!(ed.mask().voxel_count(2), 0);
    }

    #[test]
    fn test_undo_redo_sequence_round_trips() {
        let mut ed = editor();
        let mut snapshots = vec![ed.mask().data().to_vec()];
        let strokes = [
            (VoxelCoord::new(0, 0, 0), 2, 1, true),
            (VoxelCoord::new(3, 3, 3), 1, 2, true),
            (VoxelCoord::new(1, 1, 1), 3, 1, false),
            (VoxelCoord::new(2, 2, 2), 1, 3, true),
        ];
        for (center, radius, value, additive) in strokes {
            ed.begin_stroke().unwrap();
            ed.paint_at(center, radius, value, additive).unwrap();
            ed.end_stroke().unwrap();
            snapshots.push(ed.mask().data().to_vec());
        }
        for expected in snapshots.iter().rev().skip(1) {
            assert!(ed.undo().unwrap());
            assert_eq!(ed.mask().data(), expected.as_slice());
        }
        assert!(!ed.undo().unwrap());
        for expected in snapshots.iter().skip(1) {
            assert!(ed.redo().unwrap());
            assert_eq!(ed.mask().data(), expected.as_slice());
        }
        assert!(!ed.redo().unwrap());
    }

    #[test]
    fn test_new_stroke_clears_redo() {
        let mut ed = editor();
        for center in [VoxelCoord::new(0, 0, 0), VoxelCoord::new(3, 3, 3)] {
            ed.begin_stroke().unwrap();
            ed.paint_at(center, 0, 1, true).unwrap();
            ed.end_stroke().unwrap();
        }
        ed.undo().unwrap();
        assert_eq!(ed.redo_len(), 1);

        ed.begin_stroke().unwrap();
        ed.paint_at(VoxelCoord::new(2, 0, 0), 0, 1, true).unwrap();
        ed.end_stroke().unwrap();
        assert_eq!(ed.redo_len(), 0);
        assert!(!ed.redo().unwrap());
    }

    #[test]
    fn test_state_machine_errors() {
        let mut ed = editor();
        assert_eq!(
            ed.paint_at(VoxelCoord::new(0, 0, 0), 0, 1, true),
            Err(Error::NoActiveStroke)
        );
        assert_eq!(ed.end_stroke(), Err(Error::NoActiveStroke));

        ed.begin_stroke().unwrap();
        assert_eq!(ed.begin_stroke(), Err(Error::StrokeInProgress));
        assert!(ed.is_painting());
        assert_eq!(ed.undo(), Err(Error::StrokeInProgress));
        assert_eq!(ed.redo(), Err(Error::StrokeInProgress));

        // out-of-range centre fails but keeps the stroke open
        assert!(ed.paint_at(VoxelCoord::new(9, 0, 0), 1, 1, true).is_err());
        assert!(ed.is_painting());
        ed.paint_at(VoxelCoord::new(0, 0, 0), 0, 1, true).unwrap();
        assert_eq!(ed.end_stroke().unwrap(), 1);
        assert_eq!(ed.state(), BrushState::Idle);
    }

    #[test]
    fn test_empty_stroke_is_discarded() {
        let mut ed = editor();
        ed.begin_stroke().unwrap();
        ed.paint_at(VoxelCoord::new(0, 0, 0), 0, 1, true).unwrap();
        ed.end_stroke().unwrap();
        ed.undo().unwrap();

        ed.begin_stroke().unwrap();
        ed.paint_at(VoxelCoord::new(0, 0, 0), 0, 4, false).unwrap();
        assert_eq!(ed.end_stroke().unwrap(), 0);
        assert_eq!(ed.undo_len(), 0);
        assert_eq!(ed.redo_len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut ed = BrushEditor::with_undo_depth(MaskVolume::allocate(Dims::new(4, 4, 4)).unwrap(), 3);
        for x in 0..4 {
            ed.begin_stroke().unwrap();
            ed.paint_at(VoxelCoord::new(x, 0, 0), 0, 1, true).unwrap();
            ed.end_stroke().unwrap();
        }
        assert_eq!(ed.undo_len(), 3);
        while ed.undo().unwrap() {}
        // the first stroke fell off the stack and stays applied
        assert_eq!(ed.mask().voxel(0, 0, 0).unwrap(), 1);
        assert_eq!(ed.mask().voxel_count(1), 1);
    }

    #[test]
    fn test_events_and_active_source() {
        let mut ed = editor();
        assert_eq!(ed.active_source(), 1);
        assert_eq!(ed.set_active_source(0), Err(Error::InvalidSourceId(0)));
        ed.set_active_source(6).unwrap();

        assert_eq!(ed.on_event(BrushEvent::Begin).unwrap(), BrushState::Painting);
        ed.paint_active(VoxelCoord::new(2, 2, 2), 0, true).unwrap();
        assert_eq!(ed.on_event(BrushEvent::End).unwrap(), BrushState::Idle);
        assert_eq!(ed.mask().voxel(2, 2, 2).unwrap(), 6);
        assert_eq!(ed.new_source(), 7);

        ed.on_event(BrushEvent::Undo).unwrap();
        assert_eq!(ed.mask().voxel(2, 2, 2).unwrap(), 0);
        ed.on_event(BrushEvent::Redo).unwrap();
        assert_eq!(ed.mask().voxel(2, 2, 2).unwrap(), 6);
        assert!(ed.mask().is_changed());
        ed.mark_saved();
        assert!(!ed.mask().is_changed());
    }
}
