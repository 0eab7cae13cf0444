//! XML reader and writer for opflow process files.
//!
//! Supports the subset process files need: a prolog, comments, `DOCTYPE`
//! declarations (skipped), elements with quoted attributes, character data,
//! CDATA sections, and the predefined and numeric entities. Produces a small
//! element tree: [`XmlElement`].
//!
//! # Example
//! ```
//! let xml = r#"<process version="1.0"><operator name="Root" class="Process"/></process>"#;
//! let root = opflow_xml::parse(xml).unwrap();
//! assert_eq!(root.name, "process");
//! assert_eq!(root.children[0].attr("class"), Some("Process"));
//! ```

mod element;
mod parser;
mod writer;

pub use element::XmlElement;
pub use parser::parse;
pub use writer::{escape, to_string};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_nested_elements() {
        let input = r#"<?xml version="1.0" encoding="UTF-8"?>
            <process version="5.0">
              <operator name="Root" class="Process" expanded="yes">
                <parameter key="logverbosity" value="warn"/>
                <operator name="Inner" class="IOConsumer"/>
              </operator>
            </process>"#;
        let root = parse(input).unwrap();
        assert_eq!(root.name, "process");
        assert_eq!(root.attr("version"), Some("5.0"));
        let op = root.child("operator").unwrap();
        assert_eq!(op.attr("name"), Some("Root"));
        let params: Vec<_> = op.children_named("parameter").collect();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].attr("value"), Some("warn"));
        assert_eq!(op.children_named("operator").count(), 1);
    }

    #[test]
    fn parse_text_and_entities() {
        let input = "<description>a &lt; b &amp;&amp; c &#62; d &#x41;</description>";
        let root = parse(input).unwrap();
        assert_eq!(root.text, "a < b && c > d A");
    }

    #[test]
    fn parse_attribute_entities_and_single_quotes() {
        let input = r#"<p key='say "hi"' value="1 &lt; 2"/>"#;
        let root = parse(input).unwrap();
        assert_eq!(root.attr("key"), Some("say \"hi\""));
        assert_eq!(root.attr("value"), Some("1 < 2"));
    }

    #[test]
    fn comments_and_doctype_are_skipped() {
        let input = r#"<?xml version="1.0"?>
            <!DOCTYPE process>
            <!-- header -->
            <root><!-- inside --><child/></root>
            <!-- trailer -->"#;
        let root = parse(input).unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, "child");
    }

    #[test]
    fn cdata_is_taken_verbatim() {
        let input = "<d><![CDATA[<not> & parsed]]></d>";
        let root = parse(input).unwrap();
        assert_eq!(root.text, "<not> & parsed");
    }

    #[test]
    fn mismatched_closing_tag_is_an_error() {
        let input = "<a>\n  <b></c>\n</a>";
        match parse(input).unwrap_err() {
            opflow_types::EngineError::ParseError { line, col, .. } => {
                assert_eq!(line, 2);
                assert!(col >= 1);
            }
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn trailing_content_is_an_error() {
        assert!(parse("<a/><b/>").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn writer_output_parses_back() {
        let el = XmlElement::new("operator")
            .with_attr("name", "A \"quoted\" & <odd> name")
            .with_child(XmlElement::new("description").with_text("x < y"))
            .with_child(XmlElement::new("parameter").with_attr("key", "k").with_attr("value", "v"));
        let text = to_string(&el);
        assert!(text.starts_with("<?xml"));
        let back = parse(&text).unwrap();
        assert_eq!(back, el);
    }
}
