/// Whether a canonical artifact exists on disk. Presence is never
/// re-verified: an existing file is assumed complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactState {
    Missing,
    Present,
}

impl ArtifactState {
    pub fn is_present(&self) -> bool {
        matches!(self, ArtifactState::Present)
    }
}
