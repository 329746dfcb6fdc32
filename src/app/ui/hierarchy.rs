//! Arena tree for `uiautomator dump` output.
//!
//! The scanner walks the raw bytes once: element open tags become nodes, close
//! tags pop the parent stack, comments and processing instructions are skipped.
//! Attribute values are entity-decoded so locators can compare against the text
//! users actually see.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Screen rectangle from a `bounds="[l,t][r,b]"` attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let numbers: Vec<i32> = raw
            .split(|ch: char| ch == '[' || ch == ']' || ch == ',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| part.trim().parse::<i32>())
            .collect::<Result<_, _>>()
            .ok()?;
        match numbers.as_slice() {
            [left, top, right, bottom] => Some(Self::new(*left, *top, *right, *bottom)),
            _ => None,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left && point.x < self.right && point.y >= self.top && point.y < self.bottom
    }
}

pub type NodeId = usize;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiNode {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub bounds: Option<Bounds>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl UiNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        let key = match name {
            "id" => "resource-id",
            "desc" | "content-description" => "content-desc",
            other => other,
        };
        self.attrs
            .iter()
            .find(|(attr_name, _)| attr_name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> &str {
        self.attr("text").unwrap_or_default()
    }

    pub fn content_desc(&self) -> &str {
        self.attr("content-desc").unwrap_or_default()
    }

    pub fn resource_id(&self) -> &str {
        self.attr("resource-id").unwrap_or_default()
    }

    pub fn class_name(&self) -> &str {
        self.attr("class").unwrap_or_default()
    }

    pub fn flag(&self, name: &str) -> bool {
        self.attr(name) == Some("true")
    }

    pub fn selected(&self) -> bool {
        self.flag("selected")
    }

    pub fn clickable(&self) -> bool {
        self.flag("clickable")
    }
}

#[derive(Debug, Clone, Default)]
pub struct UiTree {
    nodes: Vec<UiNode>,
    roots: Vec<NodeId>,
}

impl UiTree {
    pub fn parse(xml: &str) -> Result<Self, String> {
        let bytes = xml.as_bytes();
        let mut tree = UiTree::default();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut index: usize = 0;

        while index < bytes.len() {
            if bytes[index] != b'<' {
                index += 1;
                continue;
            }
            if index + 1 >= bytes.len() {
                break;
            }
            match bytes[index + 1] {
                b'/' => {
                    index += 2;
                    while index < bytes.len() && bytes[index] != b'>' {
                        index += 1;
                    }
                    index = (index + 1).min(bytes.len());
                    stack.pop();
                }
                b'!' => {
                    index += 2;
                    while index + 2 < bytes.len()
                        && !(bytes[index] == b'-' && bytes[index + 1] == b'-' && bytes[index + 2] == b'>')
                    {
                        index += 1;
                    }
                    index = (index + 3).min(bytes.len());
                }
                b'?' => {
                    index += 2;
                    while index + 1 < bytes.len() && !(bytes[index] == b'?' && bytes[index + 1] == b'>') {
                        index += 1;
                    }
                    index = (index + 2).min(bytes.len());
                }
                _ => {
                    let (tag, attrs, self_closing, next) = scan_open_tag(xml, index + 1)?;
                    index = next;
                    let id = tree.nodes.len();
                    let bounds = attrs
                        .iter()
                        .find(|(name, _)| name == "bounds")
                        .and_then(|(_, value)| Bounds::parse(value));
                    let parent = stack.last().copied();
                    tree.nodes.push(UiNode {
                        tag,
                        attrs,
                        bounds,
                        parent,
                        children: Vec::new(),
                    });
                    match parent {
                        Some(parent_id) => tree.nodes[parent_id].children.push(id),
                        None => tree.roots.push(id),
                    }
                    if !self_closing {
                        stack.push(id);
                    }
                }
            }
        }
        Ok(tree)
    }

    pub fn node(&self, id: NodeId) -> &UiNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Nodes in document order. Ids are assigned in document order, so this is `0..len`.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        0..self.nodes.len()
    }

    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut pending: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(next) = pending.pop() {
            out.push(next);
            pending.extend(self.nodes[next].children.iter().rev().copied());
        }
        out
    }

    /// First node whose bounds are set; the `hierarchy` root carries none.
    pub fn screen_bounds(&self) -> Option<Bounds> {
        self.nodes.iter().find_map(|node| node.bounds)
    }

    pub fn packages(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for node in &self.nodes {
            if let Some(package) = node.attr("package") {
                if !package.is_empty() && !seen.contains(&package) {
                    seen.push(package);
                }
            }
        }
        seen
    }
}

type OpenTag = (String, Vec<(String, String)>, bool, usize);

fn scan_open_tag(xml: &str, start: usize) -> Result<OpenTag, String> {
    let bytes = xml.as_bytes();
    let mut cursor = start;
    while cursor < bytes.len() {
        let ch = bytes[cursor];
        if ch == b'/' || ch == b'>' || ch.is_ascii_whitespace() {
            break;
        }
        cursor += 1;
    }
    let tag_name = xml[start..cursor].to_string();
    if tag_name.is_empty() {
        return Err("Malformed XML tag".into());
    }
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;
    while cursor < bytes.len() {
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() {
            break;
        }
        match bytes[cursor] {
            b'>' => {
                cursor += 1;
                break;
            }
            b'/' => {
                self_closing = true;
                cursor += 1;
                if cursor < bytes.len() && bytes[cursor] == b'>' {
                    cursor += 1;
                }
                break;
            }
            _ => {}
        }

        let name_start = cursor;
        while cursor < bytes.len() && bytes[cursor] != b'=' && !bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() {
            return Err("Malformed attribute".into());
        }
        let name_end = cursor;
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() || bytes[cursor] != b'=' {
            return Err("Malformed attribute assignment".into());
        }
        cursor += 1;
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() {
            return Err("Missing attribute value".into());
        }
        let quote = bytes[cursor];
        if quote != b'"' && quote != b'\'' {
            return Err("Attribute value must be quoted".into());
        }
        cursor += 1;
        let value_start = cursor;
        while cursor < bytes.len() && bytes[cursor] != quote {
            cursor += 1;
        }
        if cursor >= bytes.len() {
            return Err("Unterminated attribute value".into());
        }
        let value = unescape_xml(&xml[value_start..cursor]);
        cursor += 1;
        attrs.push((xml[name_start..name_end].to_string(), value));
    }
    Ok((tag_name, attrs, self_closing, cursor))
}

pub fn unescape_xml(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|semi| *semi <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
