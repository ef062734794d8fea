use crate::domain::Entity;

/// Cache key layout of one entity family.
///
/// Keys follow `<namespace>::<id>`: point entries live under `<family>:id`,
/// parent list indexes under `<family>:by_parent`, markers for parents known
/// to be empty under `<family>:empty_parent` and natural-key lookups under
/// `<family>:natural`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeySpace {
    family: &'static str,
}

impl KeySpace {
    pub fn of<E: Entity>() -> Self {
        Self { family: E::FAMILY }
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn point(&self, id: i64) -> String {
        format!("{}:id::{}", self.family, id)
    }

    pub fn list(&self, parent_id: i64) -> String {
        format!("{}:by_parent::{}", self.family, parent_id)
    }

    pub fn empty_list(&self, parent_id: i64) -> String {
        format!("{}:empty_parent::{}", self.family, parent_id)
    }

    pub fn natural(&self, natural_key: &str) -> String {
        format!("{}:natural::{}", self.family, natural_key)
    }
}
