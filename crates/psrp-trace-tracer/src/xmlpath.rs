//! A tiny `ElementTree.find()`-style path navigator over a
//! [`roxmltree::Document`], just expressive enough for the CLIXML shapes
//! the command tracer needs to pick apart: plain tag names and a single
//! `[@N='value']` attribute predicate per segment (CLIXML property names
//! live in the `N` attribute). Each step matches direct children only, and
//! resolves to the first match, exactly like `Element.find()`.

use roxmltree::Node;

enum Segment<'a> {
    Tag(&'a str),
    TagWithAttr { tag: &'a str, attr: &'a str, value: &'a str },
}

fn parse_segment(segment: &str) -> Segment<'_> {
    let Some(bracket) = segment.find('[') else {
        return Segment::Tag(segment);
    };
    let tag = &segment[..bracket];
    let predicate = &segment[bracket + 1..segment.len() - 1]; // strip trailing ']'
    let predicate = predicate.trim_start_matches('@');
    let Some((attr, value)) = predicate.split_once('=') else {
        return Segment::Tag(segment);
    };
    let value = value.trim_matches('\'').trim_matches('"');
    Segment::TagWithAttr { tag, attr, value }
}

fn matches_segment<'a, 'input>(node: Node<'a, 'input>, segment: &Segment<'_>) -> bool {
    if !node.is_element() {
        return false;
    }
    match segment {
        Segment::Tag(tag) => node.tag_name().name() == *tag,
        Segment::TagWithAttr { tag, attr, value } => node.tag_name().name() == *tag && node.attribute(*attr) == Some(*value),
    }
}

/// Navigate `path` (segments separated by `/`) starting from `node`'s
/// direct children, one level per segment.
pub fn find<'a, 'input>(node: Node<'a, 'input>, path: &str) -> Option<Node<'a, 'input>> {
    path.split('/').try_fold(node, |current, raw_segment| {
        let segment = parse_segment(raw_segment);
        current.children().find(|child| matches_segment(*child, &segment))
    })
}

/// Direct element children of `node`, in document order.
pub fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(roxmltree::Node::is_element)
}

/// The raw original markup this node spans, used where CLIXML output must
/// echo back an element the tracer doesn't understand (the source's
/// `ET.tostring(elem)` equivalent).
pub fn outer_xml(node: Node) -> &str {
    let range = node.range();
    &node.document().input_text()[range]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(xml: &str) -> roxmltree::Document<'_> {
        roxmltree::Document::parse(xml).unwrap()
    }

    #[test]
    fn finds_plain_tag_path() {
        let d = doc("<Root><A><B>hi</B></A></Root>");
        let root = d.root_element();
        let b = find(root, "A/B").unwrap();
        assert_eq!(b.text(), Some("hi"));
    }

    #[test]
    fn finds_tag_with_attribute_predicate() {
        let d = doc(r#"<Root><Obj N="Cmds"><LST/></Obj><Obj N="Other"/></Root>"#);
        let root = d.root_element();
        let obj = find(root, "Obj[@N='Cmds']").unwrap();
        assert!(find(obj, "LST").is_some());
    }

    #[test]
    fn missing_segment_returns_none() {
        let d = doc("<Root><A/></Root>");
        let root = d.root_element();
        assert!(find(root, "A/Missing").is_none());
    }

    #[test]
    fn outer_xml_returns_original_markup() {
        let d = doc(r#"<Root><Unsupported N="x">text</Unsupported></Root>"#);
        let root = d.root_element();
        let node = find(root, "Unsupported[@N='x']").unwrap();
        assert_eq!(outer_xml(node), r#"<Unsupported N="x">text</Unsupported>"#);
    }
}
