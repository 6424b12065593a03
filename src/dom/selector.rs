//! # CSS 风格选择器匹配
//!
//! ## 设计思路
//!
//! 站点档案与特征模式均以 CSS 风格选择器描述。这里实现检测所需的最小子集：
//! 标签、`#id`、`.class`、属性存在/等值/子串（`[a]`、`[a=v]`、`[a*=v]`），
//! 以及后代组合器（空格）。伪类等不支持的语法解析期即报错，调用方按
//! "匹配不到任何元素"处理，与浏览器对非法选择器的容错行为一致。
//!
//! ## 实现思路
//!
//! - 解析为 `Compound` 序列（文档顺序：祖先在前，目标在后）。
//! - 匹配时先比对目标元素，再沿祖先链贪心匹配其余部分。
//!   后代组合器只要求"某个更上层祖先命中"，贪心自下而上即正确。

use crate::dom::NodeHandle;

/// 选择器解析错误。
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("选择器为空")]
    Empty,

    #[error("不支持的选择器语法：{0}")]
    Unsupported(String),

    #[error("属性选择器未闭合：{0}")]
    UnterminatedAttribute(String),
}

/// 属性匹配方式。
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrOp {
    /// `[name]`：属性存在即命中。
    Present,
    /// `[name=value]`：属性值全等。
    Equals,
    /// `[name*=value]`：属性值包含子串。
    Contains,
}

#[derive(Debug, Clone)]
struct AttrMatcher {
    name: String,
    op: AttrOp,
    value: String,
}

/// 单个复合选择器（无组合器部分）。
#[derive(Debug, Clone, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatcher>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attrs.is_empty()
    }

    fn matches(&self, node: &NodeHandle) -> bool {
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

        for class in &self.classes {
            if !node.has_class(class) {
                return false;
            }
        }

        for matcher in &self.attrs {
            let Some(value) = node.attr(&matcher.name) else {
                return false;
            };

            let hit = match matcher.op {
                AttrOp::Present => true,
                AttrOp::Equals => value == matcher.value.as_str(),
                AttrOp::Contains => value.contains(&matcher.value),
            };

            if !hit {
                return false;
            }
        }

        true
    }
}

/// 已解析的选择器。
#[derive(Debug, Clone)]
pub struct Selector {
    /// 文档顺序的复合选择器链，最后一项为目标元素。
    parts: Vec<Compound>,
}

impl Selector {
    /// 解析选择器字符串。
    ///
    /// 不支持的语法返回 `Err`，调用方应跳过该选择器而非中断整体流程。
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut parts = Vec::new();
        for raw in trimmed.split_whitespace() {
            parts.push(parse_compound(raw)?);
        }

        if parts.is_empty() {
            return Err(SelectorError::Empty);
        }

        Ok(Self { parts })
    }

    /// 判断元素是否命中选择器（含祖先链上的后代组合器匹配）。
    pub fn matches(&self, node: &NodeHandle) -> bool {
        let Some((target, ancestors)) = self.parts.split_last() else {
            return false;
        };

        if !target.matches(node) {
            return false;
        }

        let mut current = node.parent();
        for compound in ancestors.iter().rev() {
            loop {
                let Some(candidate) = current else {
                    return false;
                };

                current = candidate.parent();
                if compound.matches(&candidate) {
                    break;
                }
            }
        }

        true
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn parse_compound(raw: &str) -> Result<Compound, SelectorError> {
    let mut compound = Compound::default();
    let mut chars = raw.chars().peekable();

    // 前导标签名或通配符
    if let Some(&first) = chars.peek() {
        if first == '*' {
            chars.next();
        } else if first.is_alphabetic() {
            compound.tag = Some(take_ident(&mut chars));
        }
    }

    while let Some(&c) = chars.peek() {
        match c {
            '#' => {
                chars.next();
                let ident = take_ident(&mut chars);
                if ident.is_empty() {
                    return Err(SelectorError::Unsupported(raw.to_string()));
                }
                compound.id = Some(ident);
            }
            '.' => {
                chars.next();
                let ident = take_ident(&mut chars);
                if ident.is_empty() {
                    return Err(SelectorError::Unsupported(raw.to_string()));
                }
                compound.classes.push(ident);
            }
            '[' => {
                chars.next();
                compound.attrs.push(parse_attr(&mut chars, raw)?);
            }
            // 伪类、子组合器等一律不支持
            _ => return Err(SelectorError::Unsupported(raw.to_string())),
        }
    }

    if compound.is_empty() {
        return Err(SelectorError::Unsupported(raw.to_string()));
    }

    Ok(compound)
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if is_ident_char(c) {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    ident
}

fn parse_attr(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    raw: &str,
) -> Result<AttrMatcher, SelectorError> {
    let mut body = String::new();
    let mut closed = false;

    for c in chars.by_ref() {
        if c == ']' {
            closed = true;
            break;
        }
        body.push(c);
    }

    if !closed {
        return Err(SelectorError::UnterminatedAttribute(raw.to_string()));
    }

    let (name, op, value) = if let Some(idx) = body.find("*=") {
        (&body[..idx], AttrOp::Contains, &body[idx + 2..])
    } else if let Some(idx) = body.find('=') {
        (&body[..idx], AttrOp::Equals, &body[idx + 1..])
    } else {
        (body.as_str(), AttrOp::Present, "")
    };

    let name = name.trim();
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return Err(SelectorError::Unsupported(raw.to_string()));
    }

    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Ok(AttrMatcher {
        name: name.to_string(),
        op,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Node;

    #[test]
    fn parses_tag_id_class_and_attrs() {
        assert!(Selector::parse("img").is_ok());
        assert!(Selector::parse("#landingImage").is_ok());
        assert!(Selector::parse(".product-image img").is_ok());
        assert!(Selector::parse(r#"img[src*="product"]"#).is_ok());
        assert!(Selector::parse(r#"select[name*="size"]"#).is_ok());
    }

    #[test]
    fn rejects_pseudo_classes() {
        assert!(matches!(
            Selector::parse(r#"button:contains("Buy Now")"#),
            Err(SelectorError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_empty_selector() {
        assert!(matches!(Selector::parse("   "), Err(SelectorError::Empty)));
    }

    #[test]
    fn attribute_contains_matches_substring() {
        let node = Node::image("https://shop.example.com/product/123.jpg")
            .alt("model wearing jacket")
            .build();

        let selector = Selector::parse(r#"img[src*="product"]"#).expect("selector should parse");
        assert!(selector.matches(&node));

        let miss = Selector::parse(r#"img[src*="thumbnail"]"#).expect("selector should parse");
        assert!(!miss.matches(&node));
    }

    #[test]
    fn descendant_combinator_walks_ancestors() {
        let gallery = Node::element("div").class("gallery").build();
        let wrapper = Node::element("figure").build();
        let img = Node::image("https://shop.example.com/a.jpg").build();

        Node::append_child(&gallery, &wrapper);
        Node::append_child(&wrapper, &img);

        let selector = Selector::parse(".gallery img").expect("selector should parse");
        assert!(selector.matches(&img));

        let other = Selector::parse(".carousel img").expect("selector should parse");
        assert!(!other.matches(&img));
    }

    #[test]
    fn id_match_requires_exact_value() {
        let node = Node::element("img").id("landingImage").build();
        let selector = Selector::parse("#landingImage").expect("selector should parse");
        assert!(selector.matches(&node));

        let miss = Selector::parse("#otherImage").expect("selector should parse");
        assert!(!miss.matches(&node));
    }
}
