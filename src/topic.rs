use crate::{
    MAX_TOPIC_LEN_BYTES, MULTI_LEVEL_WILDCARD, MULTI_LEVEL_WILDCARD_STR, SINGLE_LEVEL_WILDCARD,
    SINGLE_LEVEL_WILDCARD_STR, SYSTEM_TOPIC_PREFIX, TOPIC_SEPARATOR,
};

/// Splits a topic into its levels. A trailing separator yields a
/// trailing empty level, matching the wire representation.
pub fn split(topic: &str) -> impl Iterator<Item = &str> {
    topic.split(TOPIC_SEPARATOR)
}

/// Owned variant of [`split`] for session layers that store the
/// level vector alongside the subscription.
pub fn split_levels(topic: &str) -> Vec<String> {
    split(topic).map(str::to_string).collect()
}

pub fn has_wildcard(topic: &str) -> bool {
    topic.bytes().any(|b| b == SINGLE_LEVEL_WILDCARD as u8 || b == MULTI_LEVEL_WILDCARD as u8)
}

/// A filter is valid when it fits the wire length prefix, every
/// wildcard occupies a whole level and `#`, if present, is the final
/// level.
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.len() > MAX_TOPIC_LEN_BYTES {
        return false;
    }

    let mut levels = split(filter).peekable();

    while let Some(level) = levels.next() {
        let has_single = level.contains(SINGLE_LEVEL_WILDCARD);
        let has_multi = level.contains(MULTI_LEVEL_WILDCARD);

        if (has_single || has_multi) && level.len() > 1 {
            return false;
        }

        if has_multi && levels.peek().is_some() {
            return false;
        }
    }

    true
}

/// Walks the publish topic against a pre-split filter.
///
/// Topics whose first level starts with `$` only match filters whose
/// first level also starts with `$`, and vice versa. `+` matches any
/// single level; `#` matches everything from the level it is
/// compared against onwards.
pub fn matches<S: AsRef<str>>(topic: &str, filter: &[S]) -> bool {
    let Some(first) = filter.first() else {
        return false;
    };

    if topic.starts_with(SYSTEM_TOPIC_PREFIX) != first.as_ref().starts_with(SYSTEM_TOPIC_PREFIX) {
        return false;
    }

    let mut level_index = 0;

    for actual in split(topic) {
        let Some(expected) = filter.get(level_index) else {
            return false;
        };
        let expected = expected.as_ref();

        if expected == actual || expected == SINGLE_LEVEL_WILDCARD_STR {
            level_index += 1;
            continue;
        }

        if expected == MULTI_LEVEL_WILDCARD_STR {
            return true;
        }

        return false;
    }

    level_index == filter.len()
}
