//! Shape validation of freshly instantiated sources
//!
//! Performed once, right after the constructor runs and before the
//! instance can be registered.

use rhai::{Dynamic, FnPtr, Map};
use sdk::errors::SourceError;
use sdk::types::Capability;
use std::collections::HashSet;

/// Metadata fields every instance must carry
pub const REQUIRED_FIELDS: [&str; 4] = ["id", "name", "version", "base_url"];

/// Identity of an instantiated source, read from its metadata fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub base_url: String,
}

/// Whether `member` on `instance` points at a function defined in the script
pub fn is_member_callable(instance: &Map, functions: &HashSet<String>, member: &str) -> bool {
    instance
        .get(member)
        .and_then(|value| value.read_lock::<FnPtr>())
        .is_some_and(|fn_ptr| functions.contains(fn_ptr.fn_name()))
}

/// Check the instance exposes the metadata fields and required members
///
/// # Errors
///
/// Returns [`SourceError::InstanceShape`] naming the first missing or
/// invalid member.
pub fn assert_plugin_shape(
    instance: &Dynamic,
    functions: &HashSet<String>,
) -> Result<SourceDescriptor, SourceError> {
    let map = instance
        .read_lock::<Map>()
        .ok_or_else(|| SourceError::InstanceShape {
            member: "instance".to_string(),
        })?;

    let field = |name: &str| -> Result<String, SourceError> {
        map.get(name)
            .and_then(|v| v.clone().into_string().ok())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SourceError::InstanceShape {
                member: name.to_string(),
            })
    };

    let descriptor = SourceDescriptor {
        id: field("id")?,
        name: field("name")?,
        version: field("version")?,
        base_url: field("base_url")?,
    };

    if let Some(missing) = Capability::REQUIRED
        .iter()
        .find(|cap| !is_member_callable(&map, functions, cap.member_name()))
    {
        return Err(SourceError::InstanceShape {
            member: missing.member_name().to_string(),
        });
    }

    Ok(descriptor)
}

/// Optional capabilities currently callable on `instance`
pub fn probe_optional(instance: &Map, functions: &HashSet<String>) -> Vec<Capability> {
    Capability::OPTIONAL
        .into_iter()
        .filter(|cap| is_member_callable(instance, functions, cap.member_name()))
        .collect()
}
