use serde::{Deserialize, Serialize};

/// Key of the tag that carries a resource's display name. Resolvers pull it
/// out of the generic tag list into the descriptor's dedicated name field.
pub const NAME_KEY: &str = "Name";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Propagate `defaults` into `tags`. A default is added only when no tag with
/// the same key (case-insensitive) is already present; existing tags always
/// win and keep whatever casing first defined the key.
pub fn inherit(tags: &mut Vec<Tag>, defaults: &[Tag]) {
    for default in defaults {
        let present = tags
            .iter()
            .any(|tag| tag.key.eq_ignore_ascii_case(&default.key));
        if !present {
            tags.push(default.clone());
        }
    }
}

/// Split a provider-returned tag list into the dedicated name (first exact
/// `Name` key, if any) and the remaining tags, preserved verbatim.
pub fn split_name(tags: &[Tag]) -> (Option<String>, Vec<Tag>) {
    let mut name = None;
    let mut rest = Vec::new();
    for tag in tags {
        if name.is_none() && tag.key == NAME_KEY {
            name = Some(tag.value.clone());
        } else {
            rest.push(tag.clone());
        }
    }
    (name, rest)
}
