//! Entity type declarations.

use crate::attrs::AttrMap;
use crate::error::{CoreError, CoreResult};

/// A managed entity type.
///
/// Implementors are marker types naming a store table and declaring the
/// attribute keys records of that type may carry. Applying an attribute
/// map to a record validates its keys against this declaration.
///
/// # Example
///
/// ```rust
/// use duostore_core::Entity;
///
/// struct Player;
///
/// impl Entity for Player {
///     const NAME: &'static str = "Player";
///     fn attributes() -> &'static [&'static str] {
///         &["name", "score"]
///     }
/// }
/// ```
pub trait Entity: 'static {
    /// The entity (table) name, unique within the store.
    const NAME: &'static str;

    /// The attribute keys records of this type may carry.
    fn attributes() -> &'static [&'static str];
}

/// Validates that every key in `values` is declared by the entity schema.
pub(crate) fn validate_attrs(
    entity: &str,
    allowed: &[&str],
    values: &AttrMap,
) -> CoreResult<()> {
    for key in values.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(CoreError::unknown_attribute(entity, key));
        }
    }
    Ok(())
}
