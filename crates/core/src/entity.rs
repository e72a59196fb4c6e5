//! Entity trait: identity that survives re-delivery and re-persistence.

/// Entity marker + minimal interface.
///
/// Stores key records by `Entity::id`, so writing the same entity twice replaces
/// the earlier copy instead of creating a second one.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
