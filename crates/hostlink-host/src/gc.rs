//! Cycle detection
//!
//! Reference counting frees everything except cycles. The detector finds
//! them with trial deletion over the tracked objects (containers and
//! instances of GC-enabled types):
//!
//! 1. `gc_refs = refcount` for every tracked object;
//! 2. every edge between tracked objects subtracts one from its target;
//! 3. objects left with `gc_refs > 0` are referenced from outside the
//!    tracked set and are roots; everything reachable from a root survives.
//!
//! Instance edges are only those the type's traversal hook reports, so a
//! reference the hook does not report makes its target look externally
//! owned. That leaks the cycle; it never frees a live object.

use hostlink_sdk::{HostApi, RawRef, TypeFlags};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::host::MemoryHost;
use crate::object::ObjKind;

/// Outcome of one [`MemoryHost::collect`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Objects examined
    pub tracked: usize,
    /// Objects found unreachable
    pub unreachable: usize,
    /// Objects freed as a consequence
    pub freed: usize,
}

struct Tracked {
    refcount: isize,
    edges: Vec<RawRef>,
}

impl MemoryHost {
    fn tracked_objects(&self) -> FxHashMap<RawRef, Tracked> {
        enum Probe {
            Container(Vec<RawRef>),
            Instance(RawRef),
            Untracked,
        }

        let mut tracked = FxHashMap::default();
        for id in self.live_ids() {
            let obj = RawRef::from_addr(id);
            let probe = self.peek(obj, |kind| match kind {
                ObjKind::Instance(inst) => Probe::Instance(inst.ty),
                kind if kind.is_container() => Probe::Container(kind.children()),
                _ => Probe::Untracked,
            });
            let edges = match probe {
                Some(Probe::Container(children)) => children,
                Some(Probe::Instance(ty)) => {
                    if !self.type_flags(ty).contains(TypeFlags::HAVE_GC) {
                        continue;
                    }
                    let mut edges = Vec::new();
                    if let Some(hook) = self.find_in_chain(ty, |t| t.traverse.clone()) {
                        hook(obj, &mut |child| edges.push(child));
                    }
                    edges
                }
                Some(Probe::Untracked) | None => continue,
            };
            tracked.insert(
                obj,
                Tracked {
                    refcount: self.refcount(obj),
                    edges,
                },
            );
        }
        tracked
    }

    /// Tracked objects kept alive only by references from other
    /// unreachable objects, in heap order
    pub fn unreachable(&self) -> Vec<RawRef> {
        self.find_garbage().1
    }

    fn find_garbage(&self) -> (usize, Vec<RawRef>) {
        let tracked = self.tracked_objects();

        let mut gc_refs: FxHashMap<RawRef, isize> = tracked
            .iter()
            .map(|(obj, info)| (*obj, info.refcount))
            .collect();
        for info in tracked.values() {
            for edge in &info.edges {
                if let Some(count) = gc_refs.get_mut(edge) {
                    *count -= 1;
                }
            }
        }

        let mut reachable: FxHashSet<RawRef> = FxHashSet::default();
        let mut pending: Vec<RawRef> = gc_refs
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(obj, _)| *obj)
            .collect();
        while let Some(obj) = pending.pop() {
            if !reachable.insert(obj) {
                continue;
            }
            if let Some(info) = tracked.get(&obj) {
                pending.extend(
                    info.edges
                        .iter()
                        .filter(|edge| tracked.contains_key(edge) && !reachable.contains(edge)),
                );
            }
        }

        let mut garbage: Vec<RawRef> = tracked
            .keys()
            .filter(|obj| !reachable.contains(obj))
            .copied()
            .collect();
        garbage.sort_by_key(|obj| obj.addr());
        (tracked.len(), garbage)
    }

    /// Find unreachable cycles and break them by clearing the containers
    /// involved; the released references free the rest.
    pub fn collect(&self) -> CollectStats {
        if self.collecting.replace(true) {
            return CollectStats::default();
        }
        let (tracked, garbage) = self.find_garbage();

        for &obj in &garbage {
            self.incref(obj);
        }
        for &obj in &garbage {
            let released = self
                .peek_mut(obj, |kind| match kind {
                    ObjKind::List(items) | ObjKind::Tuple(items) => std::mem::take(items),
                    ObjKind::Dict(dict) => std::mem::take(&mut dict.entries)
                        .into_iter()
                        .flat_map(|entry| [entry.key, entry.value])
                        .collect(),
                    _ => Vec::new(),
                })
                .unwrap_or_default();
            for child in released {
                self.decref(child);
            }
        }
        for &obj in &garbage {
            self.decref(obj);
        }

        let freed = garbage.iter().filter(|obj| !self.is_alive(**obj)).count();
        self.collecting.set(false);

        let stats = CollectStats {
            tracked,
            unreachable: garbage.len(),
            freed,
        };
        tracing::debug!(
            tracked = stats.tracked,
            unreachable = stats.unreachable,
            freed = stats.freed,
            "cycle collection finished"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_cycle_is_collected() {
        let host = MemoryHost::new();
        let before = host.live_objects();

        let list = host.new_list(&[]).unwrap();
        host.list_append(list, list).unwrap();
        assert_eq!(host.refcount(list), 2);
        host.decref(list);

        assert!(host.is_alive(list));
        assert_eq!(host.unreachable(), vec![list]);

        let stats = host.collect();
        assert_eq!(stats.unreachable, 1);
        assert_eq!(stats.freed, 1);
        assert!(!host.is_alive(list));
        assert_eq!(host.live_objects(), before);
    }

    #[test]
    fn test_reachable_objects_survive() {
        let host = MemoryHost::new();
        let dict = host.new_dict().unwrap();
        let list = host.new_list(&[dict]).unwrap();
        let key = host.new_str("self").unwrap();
        host.set_item(dict, key, list).unwrap();
        host.decref(key);
        host.decref(list);

        // The dict is still owned here, so the cycle is alive
        assert!(host.unreachable().is_empty());
        assert_eq!(host.collect().freed, 0);
        assert!(host.is_alive(list));

        host.decref(dict);
        assert_eq!(host.unreachable().len(), 2);
        assert_eq!(host.collect().freed, 2);
    }

    #[test]
    fn test_automatic_collection() {
        let host = MemoryHost::with_config(crate::HostConfig {
            gc_threshold: 4,
            ..crate::HostConfig::default()
        });
        let list = host.new_list(&[]).unwrap();
        host.list_append(list, list).unwrap();
        host.decref(list);
        for i in 0..8 {
            let value = host.new_int(i).unwrap();
            host.decref(value);
        }
        assert!(!host.is_alive(list));
    }
}
