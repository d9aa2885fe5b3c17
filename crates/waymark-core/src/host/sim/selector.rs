//! A small CSS selector subset for the simulated container tree.
//!
//! Supported: `*`, `tag`, `#id`, `.class`, `[attr]`, `[attr=v]`, `[attr^=v]`,
//! `[attr*=v]`, `[attr$=v]`, compounds of those, and comma lists. No
//! combinators. A selector that does not parse matches nothing.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttrOp {
    Exists,
    Equals(String),
    Prefix(String),
    Contains(String),
    Suffix(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AttrMatch {
    pub name: String,
    pub op: AttrOp,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Compound {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<AttrMatch>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Selector {
    alternatives: Vec<Compound>,
}

/// What a node exposes to selector matching.
pub(crate) trait Matchable {
    fn tag(&self) -> &str;
    fn id(&self) -> Option<&str>;
    fn has_class(&self, class: &str) -> bool;
    fn attr(&self, name: &str) -> Option<&str>;
}

fn compound_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(\*|[A-Za-z][\w-]*)?((?:[#.][\w$-]+|\[[^\]]+\])*)$"#)
            .expect("static selector regex")
    })
}

fn part_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"([#.])([\w$-]+)|\[\s*([\w:-]+)\s*(?:([\^*$]?=)\s*(?:"([^"]*)"|'([^']*)'|([^\]\s]*)))?\s*\]"#,
        )
        .expect("static selector part regex")
    })
}

impl Selector {
    pub fn parse(input: &str) -> Option<Self> {
        let mut alternatives = Vec::new();
        for raw in input.split(',') {
            alternatives.push(parse_compound(raw.trim())?);
        }
        if alternatives.is_empty() {
            return None;
        }
        Some(Self { alternatives })
    }

    pub fn matches(&self, node: &dyn Matchable) -> bool {
        self.alternatives.iter().any(|c| c.matches(node))
    }
}

fn parse_compound(raw: &str) -> Option<Compound> {
    if raw.is_empty() {
        return None;
    }
    let caps = compound_re().captures(raw)?;
    let mut compound = Compound::default();

    if let Some(tag) = caps.get(1) {
        if tag.as_str() != "*" {
            compound.tag = Some(tag.as_str().to_ascii_lowercase());
        }
    }

    let rest = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    let mut consumed = 0;
    for part in part_re().captures_iter(rest) {
        let whole = part.get(0)?;
        if whole.start() != consumed {
            return None;
        }
        consumed = whole.end();

        if let (Some(sigil), Some(name)) = (part.get(1), part.get(2)) {
            match sigil.as_str() {
                "#" => compound.id = Some(name.as_str().to_string()),
                _ => compound.classes.push(name.as_str().to_string()),
            }
            continue;
        }

        let name = part.get(3)?.as_str().to_string();
        let value = part
            .get(5)
            .or_else(|| part.get(6))
            .or_else(|| part.get(7))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let op = match part.get(4).map(|m| m.as_str()) {
            None => AttrOp::Exists,
            Some("=") => AttrOp::Equals(value),
            Some("^=") => AttrOp::Prefix(value),
            Some("*=") => AttrOp::Contains(value),
            Some("$=") => AttrOp::Suffix(value),
            Some(_) => return None,
        };
        compound.attrs.push(AttrMatch { name, op });
    }

    if consumed != rest.len() {
        return None;
    }
    Some(compound)
}

impl Compound {
    fn matches(&self, node: &dyn Matchable) -> bool {
        if let Some(tag) = &self.tag {
            if !node.tag().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.id() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.iter().all(|c| node.has_class(c)) {
            return false;
        }
        self.attrs.iter().all(|a| {
            let Some(value) = node.attr(&a.name) else {
                return false;
            };
            match &a.op {
                AttrOp::Exists => true,
                AttrOp::Equals(v) => value == v,
                AttrOp::Prefix(v) => value.starts_with(v.as_str()),
                AttrOp::Contains(v) => value.contains(v.as_str()),
                AttrOp::Suffix(v) => value.ends_with(v.as_str()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Fake {
        tag: &'static str,
        id: Option<&'static str>,
        classes: Vec<&'static str>,
        attrs: HashMap<&'static str, &'static str>,
    }

    impl Matchable for Fake {
        fn tag(&self) -> &str {
            self.tag
        }
        fn id(&self) -> Option<&str> {
            self.id
        }
        fn has_class(&self, class: &str) -> bool {
            self.classes.contains(&class)
        }
        fn attr(&self, name: &str) -> Option<&str> {
            self.attrs.get(name).copied()
        }
    }

    fn marker() -> Fake {
        Fake {
            tag: "img",
            id: Some("pin-7"),
            classes: vec!["marker", "poi-native"],
            attrs: HashMap::from([("src", "/static/spotlight-poi3.png"), ("data-lat", "40.1")]),
        }
    }

    #[test]
    fn test_simple_selectors() {
        let node = marker();
        assert!(Selector::parse("img").unwrap().matches(&node));
        assert!(Selector::parse("IMG").unwrap().matches(&node));
        assert!(Selector::parse("#pin-7").unwrap().matches(&node));
        assert!(Selector::parse(".marker").unwrap().matches(&node));
        assert!(Selector::parse("*").unwrap().matches(&node));
        assert!(!Selector::parse("div").unwrap().matches(&node));
    }

    #[test]
    fn test_attribute_operators() {
        let node = marker();
        assert!(Selector::parse("[data-lat]").unwrap().matches(&node));
        assert!(Selector::parse("[data-lat=\"40.1\"]").unwrap().matches(&node));
        assert!(Selector::parse("[src^=/static]").unwrap().matches(&node));
        assert!(Selector::parse("img[src*='spotlight-poi']").unwrap().matches(&node));
        assert!(Selector::parse("[src$=.png]").unwrap().matches(&node));
        assert!(!Selector::parse("[data-lng]").unwrap().matches(&node));
    }

    #[test]
    fn test_compound_and_lists() {
        let node = marker();
        assert!(Selector::parse("img.marker.poi-native[data-lat]").unwrap().matches(&node));
        assert!(!Selector::parse("img.marker.other").unwrap().matches(&node));
        assert!(Selector::parse(".nope, .poi-native").unwrap().matches(&node));
    }

    #[test]
    fn test_unparseable_selector() {
        assert!(Selector::parse("div > span").is_none());
        assert!(Selector::parse("").is_none());
        assert!(Selector::parse("a,,b").is_none());
    }
}
