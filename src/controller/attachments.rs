use crate::models::chat::FileId;

/// Files staged for the next message, in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingAttachments {
    ids: Vec<FileId>,
}

impl PendingAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages `id`. Returns `false` if it was already staged.
    pub fn add(&mut self, id: FileId) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Unstages `id`. Returns `false` if it was not staged.
    pub fn remove(&mut self, id: &FileId) -> bool {
        let before = self.ids.len();
        self.ids.retain(|staged| staged != id);
        self.ids.len() != before
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> &[FileId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
