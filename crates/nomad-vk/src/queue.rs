// SPDX-License-Identifier: CEPL-1.0
//! Queue-family resolution.
//!
//! Compute and transfer prefer families that do not also do graphics
//! (async compute, DMA engines) so their work does not queue up behind
//! rendering. When no such family exists they share the graphics family.

use std::fmt;

use ash::vk;
use tracing::{info, warn};

use crate::error::{NegotiationError, Result};

/// The kinds of work a context can request queues for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Graphics, QueueKind::Compute, QueueKind::Transfer];

    pub fn flag(self) -> vk::QueueFlags {
        match self {
            QueueKind::Graphics => vk::QueueFlags::GRAPHICS,
            QueueKind::Compute => vk::QueueFlags::COMPUTE,
            QueueKind::Transfer => vk::QueueFlags::TRANSFER,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueKind::Graphics => "graphics",
            QueueKind::Compute => "compute",
            QueueKind::Transfer => "transfer",
        })
    }
}

/// Resolved family index per [`QueueKind`]. Kinds that were not requested
/// stay at [`QueueFamilyAssignment::UNRESOLVED`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyAssignment {
    graphics: u32,
    compute: u32,
    transfer: u32,
}

impl Default for QueueFamilyAssignment {
    fn default() -> Self {
        Self {
            graphics: Self::UNRESOLVED,
            compute: Self::UNRESOLVED,
            transfer: Self::UNRESOLVED,
        }
    }
}

impl QueueFamilyAssignment {
    pub const UNRESOLVED: u32 = u32::MAX;

    #[cfg(test)]
    pub(crate) fn new(graphics: u32, compute: u32, transfer: u32) -> Self {
        Self {
            graphics,
            compute,
            transfer,
        }
    }

    pub fn index(&self, kind: QueueKind) -> Option<u32> {
        let raw = match kind {
            QueueKind::Graphics => self.graphics,
            QueueKind::Compute => self.compute,
            QueueKind::Transfer => self.transfer,
        };
        (raw != Self::UNRESOLVED).then_some(raw)
    }

    fn slot(&mut self, kind: QueueKind) -> &mut u32 {
        match kind {
            QueueKind::Graphics => &mut self.graphics,
            QueueKind::Compute => &mut self.compute,
            QueueKind::Transfer => &mut self.transfer,
        }
    }

    /// Distinct resolved families in graphics, compute, transfer order:
    /// compute only when it differs from graphics, transfer only when it
    /// differs from both. One queue is created per entry.
    pub fn distinct_families(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(3);
        if let Some(g) = self.index(QueueKind::Graphics) {
            out.push(g);
        }
        if let Some(c) = self.index(QueueKind::Compute) {
            if c != self.graphics {
                out.push(c);
            }
        }
        if let Some(t) = self.index(QueueKind::Transfer) {
            if t != self.graphics && t != self.compute {
                out.push(t);
            }
        }
        out
    }
}

fn first_family(
    families: &[vk::QueueFamilyProperties],
    pred: impl Fn(vk::QueueFlags) -> bool,
) -> Option<u32> {
    families
        .iter()
        .position(|f| pred(f.queue_flags))
        .map(|i| i as u32)
}

/// Pick the family for one kind of work.
pub fn resolve_family(families: &[vk::QueueFamilyProperties], kind: QueueKind) -> Result<u32> {
    let graphics = |flags: vk::QueueFlags| flags.contains(vk::QueueFlags::GRAPHICS);

    let picked = match kind {
        QueueKind::Graphics => first_family(families, graphics),
        QueueKind::Compute => first_family(families, |f| {
            f.contains(vk::QueueFlags::COMPUTE) && !f.contains(vk::QueueFlags::GRAPHICS)
        })
        .or_else(|| {
            warn!("no dedicated compute family, sharing the graphics family");
            first_family(families, graphics)
        }),
        QueueKind::Transfer => first_family(families, |f| {
            f.contains(vk::QueueFlags::TRANSFER)
                && !f.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .or_else(|| {
            warn!("no dedicated transfer family, sharing the graphics family");
            first_family(families, graphics)
        }),
    };

    picked.ok_or(NegotiationError::NoQueueFamily(kind))
}

/// Resolve every kind named in `desired`; the rest stay unresolved.
pub fn resolve_queue_families(
    families: &[vk::QueueFamilyProperties],
    desired: vk::QueueFlags,
) -> Result<QueueFamilyAssignment> {
    let mut assignment = QueueFamilyAssignment::default();
    for kind in QueueKind::ALL {
        if desired.contains(kind.flag()) {
            let index = resolve_family(families, kind)?;
            info!("{kind} queue family = {index}");
            *assignment.slot(kind) = index;
        }
    }
    Ok(assignment)
}

/// First resolved family (graphics, then compute, then transfer) that can
/// present, according to `supports_present`.
pub fn resolve_present_family(
    assignment: &QueueFamilyAssignment,
    mut supports_present: impl FnMut(u32) -> Result<bool>,
) -> Result<u32> {
    for kind in QueueKind::ALL {
        if let Some(index) = assignment.index(kind) {
            if supports_present(index)? {
                info!("present queue family = {index} ({kind})");
                return Ok(index);
            }
        }
    }
    Err(NegotiationError::NoPresentFamily)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    const G: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const C: vk::QueueFlags = vk::QueueFlags::COMPUTE;
    const T: vk::QueueFlags = vk::QueueFlags::TRANSFER;

    #[test]
    fn dedicated_compute_is_preferred() {
        let families = [family(G), family(C)];
        let a = resolve_queue_families(&families, G | C).unwrap();
        assert_eq!(a.graphics, 0);
        assert_eq!(a.compute, 1);
        assert_ne!(a.graphics, a.compute);
    }

    #[test]
    fn combined_family_is_shared() {
        let families = [family(G | C)];
        let a = resolve_queue_families(&families, G | C).unwrap();
        assert_eq!(a.compute, a.graphics);
        assert_eq!(a.transfer, QueueFamilyAssignment::UNRESOLVED);
    }

    #[test]
    fn transfer_needs_neither_graphics_nor_compute() {
        // Typical discrete GPU: universal, async compute (+transfer), DMA.
        let families = [family(G | C | T), family(C | T), family(T)];
        let a = resolve_queue_families(&families, G | C | T).unwrap();
        assert_eq!((a.graphics, a.compute, a.transfer), (0, 1, 2));

        // Without a DMA family transfer falls back to graphics, not to the
        // async compute family.
        let families = [family(C | T), family(G | C | T)];
        let a = resolve_queue_families(&families, G | C | T).unwrap();
        assert_eq!((a.graphics, a.compute, a.transfer), (1, 0, 1));
    }

    #[test]
    fn fallback_picks_first_graphics_family() {
        let families = [family(T | C), family(G), family(G | C)];
        assert_eq!(resolve_family(&families, QueueKind::Compute).unwrap(), 0);
        let families = [family(T | C), family(G), family(G | C)];
        assert_eq!(resolve_family(&families, QueueKind::Transfer).unwrap(), 1);
    }

    #[test]
    fn missing_graphics_is_fatal() {
        let families = [family(C), family(T)];
        let err = resolve_queue_families(&families, G | C).unwrap_err();
        assert!(matches!(err, NegotiationError::NoQueueFamily(QueueKind::Graphics)));

        // No dedicated family and no graphics to fall back on.
        let err = resolve_family(&[family(T | C)], QueueKind::Transfer).unwrap_err();
        assert!(matches!(err, NegotiationError::NoQueueFamily(QueueKind::Transfer)));
    }

    #[test]
    fn only_requested_kinds_are_resolved() {
        let families = [family(G | C | T), family(T)];
        let a = resolve_queue_families(&families, T).unwrap();
        assert_eq!(a.index(QueueKind::Graphics), None);
        assert_eq!(a.index(QueueKind::Compute), None);
        assert_eq!(a.index(QueueKind::Transfer), Some(1));
    }

    #[test]
    fn resolved_assignment_reads_through_index() {
        let families = [family(G | C | T), family(C), family(T)];
        let a = resolve_queue_families(&families, G | C | T).unwrap();
        assert_eq!(a, QueueFamilyAssignment::new(0, 1, 2));
        let read: Vec<Option<u32>> = QueueKind::ALL.iter().map(|&k| a.index(k)).collect();
        assert_eq!(read, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn resolved_indices_are_in_range() {
        let families = [family(G), family(C), family(T)];
        let a = resolve_queue_families(&families, G | C | T).unwrap();
        for kind in QueueKind::ALL {
            assert!((a.index(kind).unwrap() as usize) < families.len());
        }
    }

    #[test]
    fn coinciding_families_collapse_to_one_queue() {
        let families = [family(G | C | T)];
        let a = resolve_queue_families(&families, G | C | T).unwrap();
        assert_eq!(a.distinct_families(), vec![0]);

        let a = QueueFamilyAssignment { graphics: 0, compute: 1, transfer: 1 };
        assert_eq!(a.distinct_families(), vec![0, 1]);

        let a = QueueFamilyAssignment { graphics: 0, compute: 1, transfer: 2 };
        assert_eq!(a.distinct_families(), vec![0, 1, 2]);
    }

    #[test]
    fn present_family_walks_graphics_compute_transfer() {
        let a = QueueFamilyAssignment { graphics: 0, compute: 1, transfer: 2 };
        assert_eq!(resolve_present_family(&a, |i| Ok(i == 1)).unwrap(), 1);
        assert_eq!(resolve_present_family(&a, |_| Ok(true)).unwrap(), 0);
        assert!(matches!(
            resolve_present_family(&a, |_| Ok(false)),
            Err(NegotiationError::NoPresentFamily)
        ));

        let only_transfer = QueueFamilyAssignment { transfer: 3, ..Default::default() };
        let mut asked = Vec::new();
        let _ = resolve_present_family(&only_transfer, |i| {
            asked.push(i);
            Ok(false)
        });
        assert_eq!(asked, vec![3]);
    }
}
