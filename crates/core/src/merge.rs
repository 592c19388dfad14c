//! Zip-merge of two independently authored phase orderings.
//!
//! Both inputs are read as "these names run in this relative order". The
//! merge walks `incoming` with a cursor into the current ordering: names that
//! already exist move the cursor forward, new names are inserted right after
//! their predecessor in `incoming`. Existing names are never reordered, so a
//! name found behind the cursor means the two orderings disagree.

use crate::error::CoreError;

/// Merge `incoming` into `current`, preserving the relative order of both.
///
/// Returns [`CoreError::OrderConflict`] when `incoming` places a name before
/// a predecessor that `current` orders after it.
pub fn merge<C, I>(current: &[C], incoming: &[I]) -> Result<Vec<String>, CoreError>
where
    C: AsRef<str>,
    I: AsRef<str>,
{
    let mut target: Vec<String> = current.iter().map(|name| name.as_ref().to_string()).collect();

    let Some(first) = incoming.first() else {
        return Ok(target);
    };
    let first = first.as_ref();

    let mut cursor = match position(&target, first, 0) {
        Some(found) => found,
        None => {
            target.insert(0, first.to_string());
            0
        }
    };

    for pair in incoming.windows(2) {
        let prev = pair[0].as_ref();
        let value = pair[1].as_ref();

        match position(&target, value, cursor) {
            Some(found) => cursor = found,
            None => {
                if position(&target[..cursor], value, 0).is_some() {
                    return Err(CoreError::conflict(value, prev));
                }
                // prev is always present: it was either found or inserted on the previous step
                let anchor = position(&target, prev, 0).map_or(0, |at| at + 1);
                target.insert(anchor, value.to_string());
            }
        }
    }

    Ok(target)
}

fn position(names: &[String], name: &str, from: usize) -> Option<usize> {
    names
        .iter()
        .skip(from)
        .position(|candidate| candidate == name)
        .map(|offset| offset + from)
}
