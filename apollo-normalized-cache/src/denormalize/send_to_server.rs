use crate::spec::Selection;
use crate::spec::SelectionId;

/// Per selection "send to server" flags.
///
/// A flagged selection could not be fully served from the cache and must be fetched. Flags are
/// stored next to the result rather than on the selection tree, keyed by [`SelectionId`], so the
/// same parsed query can be denormalized concurrently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchFlags {
    flags: Vec<bool>,
}

impl FetchFlags {
    pub(crate) fn new(selection_count: usize) -> Self {
        Self {
            flags: vec![false; selection_count],
        }
    }

    pub fn needs_fetch(&self, id: SelectionId) -> bool {
        self.flags.get(id.index()).copied().unwrap_or(false)
    }

    /// Returns true if no selection is flagged.
    pub fn is_empty(&self) -> bool {
        !self.flags.iter().any(|flag| *flag)
    }

    /// Ids of the flagged selections, in document order.
    pub fn flagged(&self) -> impl Iterator<Item = SelectionId> + '_ {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, flag)| **flag)
            .map(|(index, _)| SelectionId(index))
    }

    pub(crate) fn set(&mut self, id: SelectionId) {
        let index = id.index();
        if index >= self.flags.len() {
            self.flags.resize(index + 1, false);
        }
        self.flags[index] = true;
    }

    /// Flags `id` and every selection below it.
    pub(crate) fn mark_subtree(&mut self, id: SelectionId, children: &[Selection]) {
        self.set(id);
        for child in children {
            self.mark_subtree(child.id(), child.selection_set().unwrap_or_default());
        }
    }

    /// Flags `id` if any of its children is flagged.
    ///
    /// Inline fragments are transparent: their fields count as direct children, and the fragment
    /// itself gets flagged along the way. Deeper fields are expected to have been propagated
    /// already, when their own level was resolved. Returns the flag of `id`.
    pub(crate) fn propagate(&mut self, id: SelectionId, children: &[Selection]) -> bool {
        let mut any = false;
        for child in children {
            any |= match child {
                Selection::Field(field) => self.needs_fetch(field.id),
                Selection::InlineFragment(fragment) => {
                    self.propagate(fragment.id, &fragment.selection_set)
                }
            };
        }
        if any {
            self.set(id);
        }
        self.needs_fetch(id)
    }
}
