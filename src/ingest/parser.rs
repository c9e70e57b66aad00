use pulldown_cmark::{Event, Parser, Tag, TagEnd};

/// A markdown section bounded by ATX headings.
///
/// A file without headings yields a single section with `heading = None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: Option<String>,
    pub body: String,
}

/// Split markdown text into heading-bounded sections.
///
/// Boundaries are ATX headings (`#` through `######`) only; setext headings
/// and `#` lines inside fenced code blocks are ordinary content. The body of
/// a section runs from the end of its heading line to the start of the next
/// boundary or EOF. Text before the first heading of a file that has
/// headings is not part of any section. Sections whose body is empty after
/// trimming are dropped by the caller via [`Section::body`] emptiness.
pub fn parse_sections(text: &str) -> Vec<Section> {
    let mut headings: Vec<(std::ops::Range<usize>, String)> = Vec::new();
    let mut current: Option<(std::ops::Range<usize>, String)> = None;

    for (event, range) in Parser::new(text).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                // ATX only: the heading source must begin with '#'.
                if text[range.start..].starts_with('#') {
                    current = Some((range, String::new()));
                }
            }
            Event::Text(t) => {
                if let Some((_, buf)) = current.as_mut() {
                    buf.push_str(&t);
                }
            }
            Event::Code(t) => {
                if let Some((_, buf)) = current.as_mut() {
                    buf.push_str(&t);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((span, buf)) = current.take() {
                    headings.push((span, buf.trim().to_string()));
                }
            }
            _ => {}
        }
    }

    if headings.is_empty() {
        let body = text.trim();
        if body.is_empty() {
            return Vec::new();
        }
        return vec![Section {
            heading: None,
            body: body.to_string(),
        }];
    }

    let mut sections = Vec::with_capacity(headings.len());
    for (idx, (span, title)) in headings.iter().enumerate() {
        let body_start = span.end;
        let body_end = headings
            .get(idx + 1)
            .map(|(next, _)| next.start)
            .unwrap_or(text.len());
        let body = text[body_start..body_end].trim();

        sections.push(Section {
            heading: if title.is_empty() {
                None
            } else {
                Some(title.clone())
            },
            body: body.to_string(),
        });
    }

    sections
}
