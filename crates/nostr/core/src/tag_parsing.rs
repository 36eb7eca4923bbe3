//! Accessors over `Vec<Vec<String>>` tag lists.

pub(crate) fn tag_name(tag: &[String]) -> Option<&str> {
    tag.first().map(String::as_str)
}

/// First value of the last tag called `name`; later tags override earlier ones.
pub(crate) fn last_tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    tags.iter()
        .rev()
        .find(|tag| tag_name(tag) == Some(name))
        .map(|tag| tag.get(1).map_or("", String::as_str))
}

/// First values of every non-empty tag called `name`, in order.
pub(crate) fn collect_tag_values(tags: &[Vec<String>], name: &str) -> Vec<String> {
    tags.iter()
        .filter(|tag| tag_name(tag) == Some(name))
        .filter_map(|tag| tag.get(1))
        .filter(|value| !value.is_empty())
        .cloned()
        .collect()
}

pub(crate) fn tag(name: &str, value: impl Into<String>) -> Vec<String> {
    vec![name.to_string(), value.into()]
}
