//! Locator evaluation over a [`UiTree`].
//!
//! Two syntaxes are accepted. XPath locators (starting with `/` or `(`) support
//! the subset the catalog needs: child and descendant steps, `..`, name tests
//! against the tag or widget class, predicates built from `@attr = 'v'`, `!=`,
//! `contains()`, `starts-with()`, `ends-with()`, `text()`, `and`, `or`, `not()`,
//! positional `[n]` / `[last()]`, relative existence paths (`.//node[...]`) and
//! top-level unions (`a | b`).
//!
//! Everything else is the smart shorthand: `@id` matches a resource id,
//! `%frag%` / `frag%` / `%frag` match text or description fragments, `^re`
//! is a regex over text or description, and any other string must equal the
//! text or description exactly.

use regex::Regex;

use crate::app::ui::hierarchy::{NodeId, UiNode, UiTree};

#[derive(Debug, Clone)]
pub enum Selector {
    Union(Vec<Path>),
    Smart(SmartQuery),
}

#[derive(Debug, Clone)]
pub enum SmartQuery {
    ResourceId(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Pattern(Regex),
    Exact(String),
}

#[derive(Debug, Clone)]
pub struct Path {
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    Parent,
    SelfNode,
}

#[derive(Debug, Clone)]
enum NodeTest {
    Any,
    Name(String),
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone)]
enum Operand {
    Attr(String),
    Text,
}

#[derive(Debug, Clone, Copy)]
enum StrFn {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Eq(Operand, String),
    Ne(Operand, String),
    Func(StrFn, Operand, String),
    Exists(Operand),
    Position(usize),
    Last,
    RelPath(Path),
}

pub fn compile(locator: &str) -> Result<Selector, String> {
    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err("empty locator".to_string());
    }
    if trimmed.starts_with('/') || trimmed.starts_with('(') {
        let mut parser = Parser::new(trimmed);
        let union = parser.parse_union()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(format!("unexpected trailing input at {} in {trimmed}", parser.pos));
        }
        return Ok(Selector::Union(union));
    }
    Ok(Selector::Smart(compile_smart(trimmed)?))
}

fn compile_smart(locator: &str) -> Result<SmartQuery, String> {
    if let Some(id) = locator.strip_prefix('@') {
        return Ok(SmartQuery::ResourceId(id.to_string()));
    }
    if locator.starts_with('^') {
        return Regex::new(locator)
            .map(SmartQuery::Pattern)
            .map_err(|err| format!("invalid pattern {locator}: {err}"));
    }
    let leading = locator.starts_with('%');
    let trailing = locator.len() > 1 && locator.ends_with('%');
    let inner = locator
        .strip_prefix('%')
        .unwrap_or(locator)
        .strip_suffix('%')
        .filter(|_| trailing)
        .unwrap_or_else(|| locator.strip_prefix('%').unwrap_or(locator));
    Ok(match (leading, trailing) {
        (true, true) => SmartQuery::Contains(inner.to_string()),
        (true, false) => SmartQuery::EndsWith(inner.to_string()),
        (false, true) => SmartQuery::StartsWith(inner.to_string()),
        (false, false) => SmartQuery::Exact(locator.to_string()),
    })
}

impl Selector {
    /// Matching nodes in document order, without duplicates.
    pub fn select(&self, tree: &UiTree) -> Vec<NodeId> {
        match self {
            Selector::Union(paths) => {
                let mut out: Vec<NodeId> = paths
                    .iter()
                    .flat_map(|path| path.evaluate(tree, None))
                    .collect();
                out.sort_unstable();
                out.dedup();
                out
            }
            Selector::Smart(query) => tree
                .ids()
                .filter(|id| tree.node(*id).tag != "hierarchy")
                .filter(|id| query.matches(tree.node(*id)))
                .collect(),
        }
    }
}

impl SmartQuery {
    fn matches(&self, node: &UiNode) -> bool {
        let text = node.text();
        let desc = node.content_desc();
        let either = |check: &dyn Fn(&str) -> bool| {
            (!text.is_empty() && check(text)) || (!desc.is_empty() && check(desc))
        };
        match self {
            SmartQuery::ResourceId(id) => {
                let rid = node.resource_id();
                !rid.is_empty() && (rid == id.as_str() || rid.ends_with(&format!(":id/{id}")))
            }
            SmartQuery::Contains(frag) => either(&|value: &str| value.contains(frag.as_str())),
            SmartQuery::StartsWith(frag) => either(&|value: &str| value.starts_with(frag.as_str())),
            SmartQuery::EndsWith(frag) => either(&|value: &str| value.ends_with(frag.as_str())),
            SmartQuery::Pattern(re) => either(&|value: &str| re.is_match(value)),
            SmartQuery::Exact(value) => text == value.as_str() || desc == value.as_str(),
        }
    }
}

impl Path {
    /// `context == None` is the document node above the hierarchy root.
    fn evaluate(&self, tree: &UiTree, context: Option<NodeId>) -> Vec<NodeId> {
        let mut current: Vec<Option<NodeId>> = vec![context];
        for step in &self.steps {
            let mut next: Vec<NodeId> = Vec::new();
            for ctx in &current {
                let candidates: Vec<NodeId> = axis_nodes(tree, *ctx, step.axis)
                    .into_iter()
                    .filter(|id| step.test.matches(tree.node(*id)))
                    .collect();
                next.extend(apply_predicates(tree, candidates, &step.predicates));
            }
            next.sort_unstable();
            next.dedup();
            current = next.into_iter().map(Some).collect();
        }
        current.into_iter().flatten().collect()
    }
}

fn axis_nodes(tree: &UiTree, ctx: Option<NodeId>, axis: Axis) -> Vec<NodeId> {
    match (axis, ctx) {
        (Axis::Child, None) => tree.roots().to_vec(),
        (Axis::Child, Some(id)) => tree.node(id).children.clone(),
        (Axis::Descendant, None) => tree.ids().collect(),
        (Axis::Descendant, Some(id)) => tree.descendants(id),
        (Axis::Parent, Some(id)) => tree.node(id).parent.into_iter().collect(),
        (Axis::Parent, None) => Vec::new(),
        (Axis::SelfNode, Some(id)) => vec![id],
        (Axis::SelfNode, None) => Vec::new(),
    }
}

fn apply_predicates(tree: &UiTree, mut nodes: Vec<NodeId>, predicates: &[Expr]) -> Vec<NodeId> {
    for predicate in predicates {
        let size = nodes.len();
        nodes = nodes
            .into_iter()
            .enumerate()
            .filter(|(index, id)| predicate.eval(tree, *id, index + 1, size))
            .map(|(_, id)| id)
            .collect();
    }
    nodes
}

impl NodeTest {
    fn matches(&self, node: &UiNode) -> bool {
        match self {
            NodeTest::Any => true,
            NodeTest::Name(name) => node.tag == *name || node.class_name() == name.as_str(),
        }
    }
}

impl Operand {
    fn value<'a>(&self, node: &'a UiNode) -> Option<&'a str> {
        match self {
            Operand::Attr(name) => node.attr(name),
            Operand::Text => Some(node.text()),
        }
    }
}

impl Expr {
    fn eval(&self, tree: &UiTree, id: NodeId, position: usize, size: usize) -> bool {
        let node = tree.node(id);
        match self {
            Expr::Or(left, right) => {
                left.eval(tree, id, position, size) || right.eval(tree, id, position, size)
            }
            Expr::And(left, right) => {
                left.eval(tree, id, position, size) && right.eval(tree, id, position, size)
            }
            Expr::Not(inner) => !inner.eval(tree, id, position, size),
            Expr::Eq(operand, literal) => operand.value(node) == Some(literal.as_str()),
            Expr::Ne(operand, literal) => operand
                .value(node)
                .map(|value| value != literal.as_str())
                .unwrap_or(false),
            Expr::Func(func, operand, literal) => {
                let Some(value) = operand.value(node) else {
                    return false;
                };
                match func {
                    StrFn::Contains => value.contains(literal.as_str()),
                    StrFn::StartsWith => value.starts_with(literal.as_str()),
                    StrFn::EndsWith => value.ends_with(literal.as_str()),
                }
            }
            Expr::Exists(operand) => operand
                .value(node)
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            Expr::Position(wanted) => position == *wanted,
            Expr::Last => position == size,
            Expr::RelPath(path) => !path.evaluate(tree, Some(id)).is_empty(),
        }
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        let token_chars: Vec<char> = token.chars().collect();
        if self.chars[self.pos..].starts_with(&token_chars) {
            self.pos += token_chars.len();
            true
        } else {
            false
        }
    }

    /// Keyword followed by a non-name character, so `order` is not `or`.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let saved = self.pos;
        if self.eat(keyword) {
            match self.peek() {
                Some(ch) if is_name_char(ch) => {}
                _ => return true,
            }
        }
        self.pos = saved;
        false
    }

    fn expect(&mut self, token: &str) -> Result<(), String> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("expected '{token}' at {}", self.pos))
        }
    }

    fn parse_union(&mut self) -> Result<Vec<Path>, String> {
        let mut paths = vec![self.parse_grouped_path()?];
        while self.eat("|") {
            paths.push(self.parse_grouped_path()?);
        }
        Ok(paths)
    }

    fn parse_grouped_path(&mut self) -> Result<Path, String> {
        if self.eat("(") {
            let mut inner = self.parse_union()?;
            self.expect(")")?;
            if inner.len() != 1 {
                return Err("grouped unions are not supported inside unions".to_string());
            }
            return Ok(inner.remove(0));
        }
        self.parse_path(false)
    }

    fn parse_path(&mut self, relative: bool) -> Result<Path, String> {
        let mut steps = Vec::new();
        self.skip_ws();
        if relative {
            // Leading `.` was consumed by the caller.
        } else if self.peek() != Some('/') {
            return Err(format!("path must start with '/' at {}", self.pos));
        }
        loop {
            self.skip_ws();
            let axis = if self.eat("//") {
                Axis::Descendant
            } else if self.eat("/") {
                Axis::Child
            } else {
                break;
            };
            steps.push(self.parse_step(axis)?);
        }
        if steps.is_empty() && !relative {
            return Err("empty path".to_string());
        }
        Ok(Path { steps })
    }

    fn parse_step(&mut self, axis: Axis) -> Result<Step, String> {
        self.skip_ws();
        if self.eat("..") {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Any,
                predicates: Vec::new(),
            });
        }
        if self.eat(".") {
            return Ok(Step {
                axis: Axis::SelfNode,
                test: NodeTest::Any,
                predicates: Vec::new(),
            });
        }
        let test = if self.eat("*") {
            NodeTest::Any
        } else {
            let name = self.parse_name()?;
            NodeTest::Name(name)
        };
        let mut predicates = Vec::new();
        while self.eat("[") {
            predicates.push(self.parse_or()?);
            self.expect("]")?;
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_name(&mut self) -> Result<String, String> {
        self.skip_ws();
        let start = self.pos;
        while self.peek().map(is_name_char).unwrap_or(false) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(format!("expected name at {start}"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("and") {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        let saved = self.pos;
        if self.eat_keyword("not") && self.eat("(") {
            let inner = self.parse_or()?;
            self.expect(")")?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.pos = saved;
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        if self.eat("(") {
            let inner = self.parse_or()?;
            self.expect(")")?;
            return Ok(inner);
        }
        if self.peek().map(|ch| ch.is_ascii_digit()).unwrap_or(false) {
            let start = self.pos;
            while self.peek().map(|ch| ch.is_ascii_digit()).unwrap_or(false) {
                self.pos += 1;
            }
            let digits: String = self.chars[start..self.pos].iter().collect();
            let position = digits
                .parse::<usize>()
                .map_err(|err| format!("bad position {digits}: {err}"))?;
            return Ok(Expr::Position(position));
        }
        if self.eat("last()") {
            return Ok(Expr::Last);
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            let path = self.parse_path(true)?;
            return Ok(Expr::RelPath(path));
        }
        for (name, func) in [
            ("contains", StrFn::Contains),
            ("starts-with", StrFn::StartsWith),
            ("ends-with", StrFn::EndsWith),
        ] {
            let saved = self.pos;
            if self.eat(name) && self.eat("(") {
                let operand = self.parse_operand()?;
                self.expect(",")?;
                let literal = self.parse_literal()?;
                self.expect(")")?;
                return Ok(Expr::Func(func, operand, literal));
            }
            self.pos = saved;
        }
        let operand = self.parse_operand()?;
        if self.eat("!=") {
            return Ok(Expr::Ne(operand, self.parse_literal()?));
        }
        if self.eat("=") {
            return Ok(Expr::Eq(operand, self.parse_literal()?));
        }
        Ok(Expr::Exists(operand))
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        if self.eat("@") {
            return Ok(Operand::Attr(self.parse_name()?));
        }
        if self.eat("text()") {
            return Ok(Operand::Text);
        }
        Err(format!("expected @attribute or text() at {}", self.pos))
    }

    fn parse_literal(&mut self) -> Result<String, String> {
        self.skip_ws();
        let quote = match self.peek() {
            Some(ch @ ('\'' | '"')) => ch,
            _ => return Err(format!("expected quoted literal at {}", self.pos)),
        };
        self.pos += 1;
        let start = self.pos;
        while self.peek().map(|ch| ch != quote).unwrap_or(false) {
            self.pos += 1;
        }
        if self.at_end() {
            return Err("unterminated literal".to_string());
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        self.pos += 1;
        Ok(literal)
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '.' | '_' | '-' | '$' | ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: &str = r#"<hierarchy rotation="0">
<node class="android.widget.FrameLayout" text="" content-desc="" resource-id="" bounds="[0,0][1080,2400]">
  <node class="android.widget.TextView" text="New reel" content-desc="" resource-id="com.ig:id/title" bounds="[0,0][500,100]" />
  <node class="android.widget.GridView" text="" content-desc="" resource-id="com.ig:id/gallery_grid" bounds="[0,200][1080,2000]">
    <node class="android.view.ViewGroup" text="" content-desc="" resource-id="com.ig:id/gallery_grid_item" bounds="[0,200][360,560]">
      <node class="android.widget.ImageView" text="" content-desc="Photo thumbnail" resource-id="" bounds="[0,200][360,560]" />
    </node>
    <node class="android.view.ViewGroup" text="" content-desc="" resource-id="com.ig:id/gallery_grid_item" bounds="[360,200][720,560]">
      <node class="android.widget.ImageView" text="" content-desc="Video thumbnail, 0:12" resource-id="" bounds="[360,200][720,560]" />
    </node>
  </node>
  <node class="android.widget.Button" text="Next" content-desc="" resource-id="com.ig:id/next_button" bounds="[900,0][1080,100]" />
</node>
</hierarchy>"#;

    fn select(locator: &str) -> Vec<NodeId> {
        let tree = UiTree::parse(SCREEN).expect("parse");
        compile(locator).expect("compile").select(&tree)
    }

    #[test]
    fn matches_attribute_equality() {
        assert_eq!(select("//*[@text='New reel']"), vec![2]);
        assert_eq!(select("//node[@resource-id='com.ig:id/next_button']"), vec![8]);
        assert!(select("//*[@text='Missing']").is_empty());
    }

    #[test]
    fn matches_class_name_tests() {
        assert_eq!(select("//android.widget.Button"), vec![8]);
        assert_eq!(select("//android.view.ViewGroup").len(), 2);
    }

    #[test]
    fn supports_functions_and_boolean_logic() {
        assert_eq!(select("//*[starts-with(@content-desc, 'Video thumbnail')]"), vec![7]);
        assert_eq!(
            select("//*[contains(@text, 'Next') or contains(@content-desc, 'Share')]"),
            vec![8]
        );
        assert_eq!(
            select("//*[@resource-id='com.ig:id/gallery_grid_item' and not(.//*[starts-with(@content-desc,'Photo')])]"),
            vec![6]
        );
    }

    #[test]
    fn supports_relative_existence_and_parent_steps() {
        assert_eq!(
            select("//*[@resource-id='com.ig:id/gallery_grid_item'][.//*[starts-with(@content-desc, 'Video thumbnail')]]"),
            vec![6]
        );
        assert_eq!(select("//*[@content-desc='Photo thumbnail']/.."), vec![4]);
    }

    #[test]
    fn supports_positions_and_unions() {
        assert_eq!(select("//*[@resource-id='com.ig:id/gallery_grid_item'][1]"), vec![4]);
        assert_eq!(select("//*[@resource-id='com.ig:id/gallery_grid_item'][last()]"), vec![6]);
        assert_eq!(select("//*[@text='Next'] | //*[@text='New reel']"), vec![2, 8]);
        assert_eq!(select("(//*[@text='Next'])"), vec![8]);
    }

    #[test]
    fn supports_child_steps() {
        assert_eq!(select("/hierarchy/node/android.widget.TextView"), vec![2]);
        assert!(select("/node").is_empty());
    }

    #[test]
    fn smart_shorthand() {
        assert_eq!(select("@next_button"), vec![8]);
        assert_eq!(select("@com.ig:id/title"), vec![2]);
        assert_eq!(select("%thumbnail%"), vec![5, 7]);
        assert_eq!(select("Video%"), vec![7]);
        assert_eq!(select("%reel"), vec![2]);
        assert_eq!(select("^Video thumbnail, \\d+:\\d+$"), vec![7]);
        assert_eq!(select("Next"), vec![8]);
    }

    #[test]
    fn rejects_malformed_locators() {
        assert!(compile("").is_err());
        assert!(compile("//*[@text='unterminated]").is_err());
        assert!(compile("//*[@text=").is_err());
        assert!(compile("//*[@text='x'] junk").is_err());
        assert!(compile("^(").is_err());
    }

    #[test]
    fn keyword_prefixes_are_not_operators() {
        assert_eq!(select("//*[@text='Next' or @text='Nope']"), vec![8]);
        // `@order` must parse as an attribute name, not `@` + `or` + `der`.
        assert!(select("//*[@order='x']").is_empty());
    }
}
