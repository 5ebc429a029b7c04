// SPDX-License-Identifier: MIT OR Apache-2.0
//! Room scope matching.
//!
//! Scope is decided on the room name alone: include globs gate entry,
//! exclude globs carve holes, and exclude always wins. An enabled engine
//! with no include globs inspects every room.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::CompiledPolicy;

/// Compile a glob list, pushing failures into `errors`. Empty lists
/// compile to `None` ("no constraint").
pub(crate) fn compile_globs(patterns: &[String], errors: &mut Vec<String>) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    let mut valid = true;
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                errors.push(format!("invalid scope glob {pattern:?}: {e}"));
                valid = false;
            }
        }
    }
    if !valid {
        return None;
    }
    match builder.build() {
        Ok(set) => Some(set),
        Err(e) => {
            errors.push(format!("failed to build glob set: {e}"));
            None
        }
    }
}

/// Whether `room` falls inside the policy's scope.
#[must_use]
pub fn in_scope(room: &str, policy: &CompiledPolicy) -> bool {
    if policy
        .exclude
        .as_ref()
        .is_some_and(|set| set.is_match(room))
    {
        return false;
    }
    if let Some(include) = &policy.include {
        return include.is_match(room);
    }
    true
}
