//! Small path-based lookup helpers over a [`roxmltree::Document`], standing
//! in for `ElementTree.find()`/`.findall()` path navigation used throughout
//! the original WS-Man handlers. Each path segment is `(namespace, local
//! name)` and is resolved against direct children only, one level at a time
//! — matching `ElementTree`'s slash-separated path semantics rather than a
//! general descendant search.

use roxmltree::Node;

/// Find the single child matching `(namespace, local_name)` among `node`'s
/// direct children.
pub fn child<'a>(node: Node<'a, 'a>, namespace: &str, local_name: &str) -> Option<Node<'a, 'a>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == local_name && c.tag_name().namespace() == Some(namespace))
}

/// Resolve a multi-segment path of `(namespace, local_name)` pairs, each
/// step matched against the previous node's direct children.
pub fn path<'a>(node: Node<'a, 'a>, segments: &[(&str, &str)]) -> Option<Node<'a, 'a>> {
    segments.iter().try_fold(node, |current, &(ns, name)| child(current, ns, name))
}

/// All direct children matching `(namespace, local_name)`.
pub fn children<'a, 'b>(node: Node<'a, 'a>, namespace: &'b str, local_name: &'b str) -> impl Iterator<Item = Node<'a, 'a>> + 'b
where
    'a: 'b,
{
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().name() == local_name && c.tag_name().namespace() == Some(namespace))
}

/// The text content of a leaf element, if any.
pub fn text(node: Node<'_, '_>) -> Option<&str> {
    node.text()
}

/// Find a `w:Selector` by its `Name` attribute under
/// `w:SelectorSet/w:Selector` (the WS-Man selector-set idiom used to carry
/// `ShellId` in request headers and in `CreateResponse` bodies).
pub fn selector_value<'a>(selector_set_owner: Node<'a, 'a>, namespace: &str, name: &str) -> Option<&'a str> {
    let selector_set = child(selector_set_owner, namespace, "SelectorSet")?;
    children(selector_set, namespace, "Selector")
        .find(|selector| selector.attribute("Name") == Some(name))
        .and_then(|selector| selector.text())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://example.com/ns";

    fn parse(xml: &str) -> roxmltree::Document<'_> {
        roxmltree::Document::parse(xml).unwrap()
    }

    #[test]
    fn child_finds_direct_child_by_namespace_and_name() {
        let xml = format!(r#"<Root xmlns:n="{NS}"><n:Header/><n:Body/></Root>"#);
        let doc = parse(&xml);
        let root = doc.root_element();
        let header = child(root, NS, "Header");
        assert!(header.is_some());
    }

    #[test]
    fn path_navigates_multiple_levels() {
        let xml = format!(r#"<Root xmlns:n="{NS}"><n:Body><n:Inner>hi</n:Inner></n:Body></Root>"#);
        let doc = parse(&xml);
        let root = doc.root_element();
        let inner = path(root, &[(NS, "Body"), (NS, "Inner")]).unwrap();
        assert_eq!(text(inner), Some("hi"));
    }

    #[test]
    fn selector_value_finds_named_selector() {
        let xml = format!(
            r#"<Header xmlns:n="{NS}"><n:SelectorSet><n:Selector Name="ShellId">abc-123</n:Selector></n:SelectorSet></Header>"#
        );
        let doc = parse(&xml);
        let header = doc.root_element();
        assert_eq!(selector_value(header, NS, "ShellId"), Some("abc-123"));
        assert_eq!(selector_value(header, NS, "Missing"), None);
    }
}
