use crate::element::XmlElement;

const INDENT: &str = "  ";

/// Escape text for use inside attribute values and character data.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Render `root` as an indented XML document with a declaration.
pub fn to_string(root: &XmlElement) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    write_element(&mut out, root, 0);
    out
}

fn write_element(out: &mut String, el: &XmlElement, depth: usize) {
    let pad = INDENT.repeat(depth);
    out.push_str(&pad);
    out.push('<');
    out.push_str(&el.name);
    for (k, v) in &el.attributes {
        out.push_str(&format!(" {}=\"{}\"", k, escape(v)));
    }

    if el.children.is_empty() {
        if el.text.is_empty() {
            out.push_str("/>\n");
        } else {
            out.push_str(&format!(">{}</{}>\n", escape(&el.text), el.name));
        }
        return;
    }

    out.push_str(">\n");
    if !el.text.is_empty() {
        out.push_str(&pad);
        out.push_str(INDENT);
        out.push_str(&escape(&el.text));
        out.push('\n');
    }
    for child in &el.children {
        write_element(out, child, depth + 1);
    }
    out.push_str(&pad);
    out.push_str(&format!("</{}>\n", el.name));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_elements_self_close() {
        let el = XmlElement::new("parameter").with_attr("key", "a");
        assert_eq!(
            to_string(&el),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<parameter key=\"a\"/>\n"
        );
    }

    #[test]
    fn children_are_indented() {
        let el = XmlElement::new("list").with_child(XmlElement::new("parameter"));
        let text = to_string(&el);
        assert!(text.contains("<list>\n  <parameter/>\n</list>\n"));
    }

    #[test]
    fn escape_covers_markup() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&apos;");
    }
}
