use winnow::ascii::multispace0;
use winnow::combinator::{alt, opt};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{literal, take_till, take_until, take_while};
use winnow::{ModalResult, Parser};

use opflow_types::EngineError;

use crate::element::XmlElement;

fn make_cut_error(desc: &'static str) -> ErrMode<ContextError<StrContext>> {
    let mut e = ContextError::new();
    e.push(StrContext::Expected(StrContextValue::Description(desc)));
    ErrMode::Cut(e)
}

/// Whitespace consumer (including newlines).
fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')
}

/// Parse an element or attribute name.
fn name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (take_while(1, is_name_start), take_while(0.., is_name_char))
        .take()
        .parse_next(input)
}

/// Replace predefined and numeric character references. Unknown references
/// are kept as written.
pub(crate) fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after.find(';').and_then(|semi| {
            let entity = &after[..semi];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                        u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse::<u32>().ok().and_then(char::from_u32)
                    } else {
                        None
                    }
                }
            };
            ch.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse a single- or double-quoted attribute value.
fn quoted_value(input: &mut &str) -> ModalResult<String> {
    let quote = alt(('"', '\'')).parse_next(input)?;
    let raw = take_till(0.., move |c: char| c == quote).parse_next(input)?;
    let _ = literal(quote).parse_next(input)?;
    Ok(unescape(raw))
}

/// Parse a single attribute: name '=' quoted-value.
fn attribute(input: &mut &str) -> ModalResult<(String, String)> {
    let key = name.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = '='.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let value = quoted_value
        .context(StrContext::Expected(StrContextValue::Description(
            "quoted attribute value",
        )))
        .parse_next(input)?;
    Ok((key.to_string(), value))
}

fn comment<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let _ = literal("<!--").parse_next(input)?;
    let body = take_until(0.., "-->").parse_next(input)?;
    let _ = literal("-->").parse_next(input)?;
    Ok(body)
}

fn processing_instruction<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let _ = literal("<?").parse_next(input)?;
    let body = take_until(0.., "?>").parse_next(input)?;
    let _ = literal("?>").parse_next(input)?;
    Ok(body)
}

fn doctype<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let _ = literal("<!DOCTYPE").parse_next(input)?;
    let body = take_till(0.., '>').parse_next(input)?;
    let _ = '>'.parse_next(input)?;
    Ok(body)
}

fn cdata<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let _ = literal("<![CDATA[").parse_next(input)?;
    let body = take_until(0.., "]]>").parse_next(input)?;
    let _ = literal("]]>").parse_next(input)?;
    Ok(body)
}

/// Skip whitespace, comments, processing instructions and doctype declarations.
fn misc(input: &mut &str) -> ModalResult<()> {
    loop {
        let _ = ws.parse_next(input)?;
        if opt(alt((comment, processing_instruction, doctype)))
            .parse_next(input)?
            .is_none()
        {
            return Ok(());
        }
    }
}

/// Parse '<' name attribute* ( '/>' | '>' content '</' name '>' ).
fn element(input: &mut &str) -> ModalResult<XmlElement> {
    let _ = '<'.parse_next(input)?;
    let tag = name.parse_next(input)?;
    let mut el = XmlElement::new(tag);

    loop {
        let _ = ws.parse_next(input)?;
        match opt(attribute).parse_next(input)? {
            Some((k, v)) => el.attributes.push((k, v)),
            None => break,
        }
    }

    if opt(literal("/>")).parse_next(input)?.is_some() {
        return Ok(el);
    }
    if opt('>').parse_next(input)?.is_none() {
        return Err(make_cut_error("'>' or '/>' to close the start tag"));
    }

    let mut text = String::new();
    loop {
        let chunk = take_till(0.., '<').parse_next(input)?;
        text.push_str(&unescape(chunk));
        if input.is_empty() {
            return Err(make_cut_error("closing tag before end of input"));
        }
        if input.starts_with("</") {
            break;
        }
        if input.starts_with("<!--") {
            let _ = comment.parse_next(input)?;
        } else if input.starts_with("<![CDATA[") {
            text.push_str(cdata.parse_next(input)?);
        } else if input.starts_with("<?") {
            let _ = processing_instruction.parse_next(input)?;
        } else {
            let child = element.parse_next(input)?;
            el.children.push(child);
        }
    }

    let _ = literal("</").parse_next(input)?;
    let closing = name
        .context(StrContext::Expected(StrContextValue::Description(
            "closing tag name",
        )))
        .parse_next(input)?;
    if closing != el.name {
        return Err(make_cut_error("matching closing tag"));
    }
    let _ = ws.parse_next(input)?;
    let _ = '>'.parse_next(input)?;

    el.text = text.trim().to_string();
    Ok(el)
}

/// Top-level parser: misc* element misc* EOF.
fn document(input: &mut &str) -> ModalResult<XmlElement> {
    misc.parse_next(input)?;
    let root = element
        .context(StrContext::Expected(StrContextValue::Description(
            "root element",
        )))
        .parse_next(input)?;
    misc.parse_next(input)?;
    if !input.is_empty() {
        return Err(make_cut_error("end of document after the root element"));
    }
    Ok(root)
}

/// Compute (line, col) from the number of bytes consumed.
fn offset_to_line_col(source: &str, consumed: usize) -> (usize, usize) {
    let prefix = &source[..consumed.min(source.len())];
    let line = prefix.matches('\n').count() + 1;
    let col = match prefix.rfind('\n') {
        Some(pos) => consumed - pos,
        None => consumed + 1,
    };
    (line, col)
}

/// Public entry point.
pub fn parse(input: &str) -> std::result::Result<XmlElement, EngineError> {
    let mut remaining = input;

    document.parse_next(&mut remaining).map_err(|e| {
        let (line, col) = offset_to_line_col(input, input.len() - remaining.len());
        let message = format!("{}", e);

        let snippet = remaining.chars().take(40).collect::<String>();
        let source_snippet = if snippet.is_empty() {
            None
        } else {
            Some(snippet)
        };

        tracing::debug!(line, col, "XML parse failed");
        EngineError::ParseError {
            line,
            col,
            message,
            source_snippet,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_known_and_unknown() {
        assert_eq!(unescape("a&amp;b"), "a&b");
        assert_eq!(unescape("&unknown; &"), "&unknown; &");
        assert_eq!(unescape("&#9731;"), "\u{2603}");
    }

    #[test]
    fn line_col_counts_from_one() {
        assert_eq!(offset_to_line_col("abc", 0), (1, 1));
        assert_eq!(offset_to_line_col("ab\ncd", 4), (2, 2));
    }

    #[test]
    fn quoted_value_stops_at_the_matching_quote() {
        let mut input = r#"'say "hi"' rest"#;
        assert_eq!(quoted_value(&mut input).unwrap(), r#"say "hi""#);
        assert_eq!(input, " rest");

        let mut input = r#""it's""#;
        assert_eq!(quoted_value(&mut input).unwrap(), "it's");
        assert!(input.is_empty());

        let mut input = "'open";
        assert!(quoted_value(&mut input).is_err());
    }

    #[test]
    fn unterminated_element_is_an_error() {
        assert!(parse("<a><b/>").is_err());
        assert!(parse("<a x=1/>").is_err());
    }
}
